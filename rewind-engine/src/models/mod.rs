//! Inputs handed to the engine by its collaborators, and the records it
//! persists.

pub mod backup_record;

pub use backup_record::{BackupRecord, FULL_BACKUP_PROFILE_ID};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A game as reported by the external detector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub name: String,
    pub is_detected: bool,
    pub detected_save_path: PathBuf,
}

impl Game {
    pub fn detected(id: impl Into<String>, name: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_detected: true,
            detected_save_path: save_path.into(),
        }
    }
}

/// Named subset of files inside a save directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveProfile {
    pub id: i64,
    pub name: String,
    /// Paths relative to the save directory, in backup order
    pub files: Vec<String>,
}

/// Caller-supplied options for a create operation
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Display name; a formatted timestamp is used when absent
    pub name: Option<String>,
    pub notes: String,
    /// `None` backs up the whole save directory
    pub profile: Option<SaveProfile>,
}

impl BackupOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_profile(mut self, profile: SaveProfile) -> Self {
        self.profile = Some(profile);
        self
    }
}
