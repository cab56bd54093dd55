//! Custom error types for the archive engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Another backup or restore operation is already in progress")]
    Busy,

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("None of the profile files exist under {}", .0.display())]
    EmptyProfile(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl EngineError {
    /// Wrap an I/O failure with the path it happened on
    pub fn archive(context: &str, path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        EngineError::Archive(format!("{} {}: {}", context, path.display(), err))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
