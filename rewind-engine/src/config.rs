//! Configuration management for the archive engine.
//!
//! Loads configuration from a TOML file; every section falls back to its
//! defaults when omitted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest gzip level accepted by the engine
pub const MIN_COMPRESSION_LEVEL: u32 = 1;

/// Largest gzip level accepted by the engine
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Name of the per-user data directory the backups live under
const APP_DIR_NAME: &str = "game-rewind";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the backup tree (`<root>/games/<gameId>/...`)
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Gzip level (1-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_backup_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_compression_level() -> u32 {
    6
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            archive: ArchiveConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine would otherwise silently ignore
    pub fn validate(&self) -> crate::Result<()> {
        if !is_valid_compression_level(self.archive.compression_level) {
            return Err(crate::EngineError::Config(format!(
                "compression_level must be between {} and {}, got {}",
                MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL, self.archive.compression_level
            )));
        }
        if self.storage.backup_dir.as_os_str().is_empty() {
            return Err(crate::EngineError::Config(
                "backup_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn is_valid_compression_level(level: u32) -> bool {
    (MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.archive.compression_level, 6);
        assert_eq!(config.log.level, "info");
        assert!(config.storage.backup_dir.ends_with(APP_DIR_NAME));
    }

    #[test]
    fn test_partial_file_uses_defaults() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[storage]\nbackup_dir = \"/srv/rewind\"")?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.storage.backup_dir, PathBuf::from("/srv/rewind"));
        assert_eq!(config.archive.compression_level, 6);

        Ok(())
    }

    #[test]
    fn test_out_of_range_level_rejected() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[archive]\ncompression_level = 12")?;

        assert!(Config::from_file(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_level_range() {
        assert!(!is_valid_compression_level(0));
        assert!(is_valid_compression_level(1));
        assert!(is_valid_compression_level(9));
        assert!(!is_valid_compression_level(10));
    }
}
