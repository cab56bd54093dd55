//! Utility modules for the archive engine.

pub mod errors;
pub mod logger;

pub use errors::{EngineError, Result};
