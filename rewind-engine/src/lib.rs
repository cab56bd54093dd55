//! Rewind Engine Library
//!
//! Point-in-time backups of game save directories: gzip-compressed tar
//! archives with JSON sidecars, restored, verified and pruned through a
//! single-flight orchestrator.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod events;
pub mod executor;
pub mod fs;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use events::{EngineEvent, EventBus};
pub use executor::{BackupManager, Operation, OperationHandle};
pub use models::{BackupOptions, BackupRecord, Game, SaveProfile};
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;
