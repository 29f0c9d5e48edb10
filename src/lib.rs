//! RACER: multi-account automation engine for the Racer prediction mini-game
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod api;
pub mod credentials;
pub mod engine;
pub mod reporter;
pub mod dashboard;
