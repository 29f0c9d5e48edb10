//! Integration tests: full passes over a file-backed credential store
//! against an in-memory game.

mod automation;
mod mock_game;
