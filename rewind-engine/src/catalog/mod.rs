//! On-disk catalog of backups.
//!
//! Layout under the backup root:
//!
//! ```text
//! <root>/games/<gameId>/<backupId>.tar.gz
//! <root>/games/<gameId>/<backupId>.tar.gz.json
//! ```
//!
//! Sidecars are the source of truth for listing; a sidecar that cannot be
//! parsed is skipped, never reported.

use crate::models::backup_record::sidecar_path_for;
use crate::models::BackupRecord;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";
const SIDECAR_EXTENSION: &str = ".json";
const GAMES_DIR: &str = "games";

#[derive(Debug, Clone)]
pub struct BackupCatalog {
    root: PathBuf,
}

impl BackupCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn game_dir(&self, game_id: &str) -> PathBuf {
        self.root.join(GAMES_DIR).join(game_id)
    }

    pub fn archive_path(&self, game_id: &str, backup_id: &str) -> PathBuf {
        self.game_dir(game_id)
            .join(format!("{}{}", backup_id, ARCHIVE_EXTENSION))
    }

    /// Millisecond timestamp id, bumped past any id already taken in the
    /// game's directory
    pub fn next_backup_id(&self, game_id: &str, now: &DateTime<Local>) -> String {
        let mut millis = now.timestamp_millis();
        loop {
            let id = millis.to_string();
            let archive = self.archive_path(game_id, &id);
            if !archive.exists() && !sidecar_path_for(&archive).exists() {
                return id;
            }
            millis += 1;
        }
    }

    /// All readable records of a game, newest first
    pub fn list(&self, game_id: &str) -> Vec<BackupRecord> {
        let dir = self.game_dir(game_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut records: Vec<BackupRecord> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_suffix(p, SIDECAR_EXTENSION))
            .filter_map(|p| load_record(&p))
            .filter(|r| !r.id.is_empty())
            .collect();

        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        records
    }

    pub fn find(&self, game_id: &str, backup_id: &str) -> Option<BackupRecord> {
        self.list(game_id).into_iter().find(|r| r.id == backup_id)
    }

    /// Game ids whose directory holds at least one archive, sorted.
    ///
    /// Includes games the detector no longer reports.
    pub fn game_ids_with_backups(&self) -> Vec<String> {
        let games = match fs::read_dir(self.root.join(GAMES_DIR)) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut ids: Vec<String> = games
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter(|e| contains_archive(&e.path()))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        ids.sort();
        ids
    }

    /// Name recorded in the newest backup, or the id when none is known
    pub fn game_name_from_backups(&self, game_id: &str) -> String {
        self.list(game_id)
            .into_iter()
            .map(|r| r.game_name)
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| game_id.to_string())
    }

    /// Persist a record's sidecar next to its archive.
    ///
    /// Written to a temporary file and renamed, so readers see either the
    /// old sidecar or the new one.
    pub fn write_record(&self, record: &BackupRecord) -> Result<()> {
        let sidecar = record.metadata_path();
        let mut tmp_name = sidecar.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let json = serde_json::to_vec_pretty(record)?;
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp, &sidecar)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(EngineError::Metadata(format!(
                "Failed to write {}: {}",
                sidecar.display(),
                e
            )));
        }

        debug!("Wrote metadata {}", sidecar.display());
        Ok(())
    }
}

fn load_record(path: &Path) -> Option<BackupRecord> {
    let content = fs::read(path).ok()?;
    match serde_json::from_slice::<BackupRecord>(&content) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Ignoring unreadable backup metadata {}: {}", path.display(), e);
            None
        }
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(suffix))
        .unwrap_or(false)
}

fn contains_archive(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.path().is_file() && has_suffix(&e.path(), ARCHIVE_EXTENSION))
        })
        .unwrap_or(false)
}

/// Ids become directory and file names; they must be one plain component
pub fn is_valid_id(id: &str) -> bool {
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FULL_BACKUP_PROFILE_ID;
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(catalog: &BackupCatalog, game: &str, id: &str, name: &str, ts: DateTime<Local>) -> BackupRecord {
        BackupRecord {
            id: id.to_string(),
            game_id: game.to_string(),
            game_name: "Hollow Knight".to_string(),
            display_name: name.to_string(),
            notes: String::new(),
            timestamp: ts,
            archive_path: catalog.archive_path(game, id),
            size: 10,
            profile_name: String::new(),
            profile_id: FULL_BACKUP_PROFILE_ID,
        }
    }

    fn store(catalog: &BackupCatalog, rec: &BackupRecord) -> Result<()> {
        fs::create_dir_all(catalog.game_dir(&rec.game_id))?;
        fs::write(&rec.archive_path, b"archive")?;
        catalog.write_record(rec)
    }

    #[test]
    fn test_list_sorted_newest_first() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = BackupCatalog::new(dir.path());
        let now = Local::now();

        store(&catalog, &record(&catalog, "hk", "1", "First", now - Duration::seconds(2)))?;
        store(&catalog, &record(&catalog, "hk", "3", "Third", now))?;
        store(&catalog, &record(&catalog, "hk", "2", "Second", now - Duration::seconds(1)))?;

        for _ in 0..3 {
            let names: Vec<_> = catalog.list("hk").into_iter().map(|r| r.display_name).collect();
            assert_eq!(names, vec!["Third", "Second", "First"]);
        }
        Ok(())
    }

    #[test]
    fn test_list_skips_corrupt_and_empty_id() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = BackupCatalog::new(dir.path());
        store(&catalog, &record(&catalog, "hk", "1", "Good", Local::now()))?;

        let game_dir = catalog.game_dir("hk");
        fs::write(game_dir.join("2.tar.gz.json"), b"{ not json")?;
        let mut blank = record(&catalog, "hk", "", "Blank", Local::now());
        blank.archive_path = game_dir.join("blank.tar.gz");
        catalog.write_record(&blank)?;

        let records = catalog.list("hk");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name, "Good");
        Ok(())
    }

    #[test]
    fn test_list_missing_game_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(BackupCatalog::new(dir.path()).list("nothing").is_empty());
    }

    #[test]
    fn test_find_by_id() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = BackupCatalog::new(dir.path());
        store(&catalog, &record(&catalog, "hk", "77", "Target", Local::now()))?;

        assert_eq!(catalog.find("hk", "77").map(|r| r.display_name), Some("Target".to_string()));
        assert!(catalog.find("hk", "no-such-id").is_none());
        Ok(())
    }

    #[test]
    fn test_game_ids_require_an_archive() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = BackupCatalog::new(dir.path());
        store(&catalog, &record(&catalog, "b-game", "1", "x", Local::now()))?;
        store(&catalog, &record(&catalog, "a-game", "1", "x", Local::now()))?;
        fs::create_dir_all(catalog.game_dir("empty-game"))?;

        assert_eq!(catalog.game_ids_with_backups(), vec!["a-game", "b-game"]);
        Ok(())
    }

    #[test]
    fn test_game_name_fallback() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = BackupCatalog::new(dir.path());
        store(&catalog, &record(&catalog, "hk", "1", "x", Local::now()))?;

        assert_eq!(catalog.game_name_from_backups("hk"), "Hollow Knight");
        assert_eq!(catalog.game_name_from_backups("no-such-game"), "no-such-game");
        Ok(())
    }

    #[test]
    fn test_next_id_skips_taken() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = BackupCatalog::new(dir.path());
        let now = Local::now();
        let first = catalog.next_backup_id("hk", &now);
        store(&catalog, &record(&catalog, "hk", &first, "x", now))?;

        let second = catalog.next_backup_id("hk", &now);
        assert_ne!(first, second);
        assert_eq!(second.parse::<i64>().unwrap(), now.timestamp_millis() + 1);
        Ok(())
    }

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("hollow-knight"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id("a/b"));
    }
}
