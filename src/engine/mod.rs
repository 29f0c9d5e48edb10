//! Core engine: the per-account pass loop and its decision pieces.

pub mod automation;
pub mod boost;
pub mod pacer;
pub mod prediction;
