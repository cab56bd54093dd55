use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `profile_id` value marking a backup of the whole save directory
pub const FULL_BACKUP_PROFILE_ID: i64 = -1;

/// One persisted snapshot, as stored in its JSON sidecar.
///
/// `game_name` and `profile_name` are copies, so a record stays readable
/// after the game or profile it came from is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub notes: String,
    pub timestamp: DateTime<Local>,
    pub archive_path: PathBuf,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub profile_name: String,
    #[serde(default = "default_profile_id")]
    pub profile_id: i64,
}

fn default_profile_id() -> i64 {
    FULL_BACKUP_PROFILE_ID
}

impl BackupRecord {
    pub fn is_full_backup(&self) -> bool {
        self.profile_id == FULL_BACKUP_PROFILE_ID
    }

    /// Sidecar location: the archive path with `.json` appended
    pub fn metadata_path(&self) -> PathBuf {
        sidecar_path_for(&self.archive_path)
    }
}

pub(crate) fn sidecar_path_for(archive_path: &std::path::Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

/// Default display name, e.g. `2024-03-01 18:22:05`
pub fn default_display_name(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_field_names() {
        let record = BackupRecord {
            id: "1700000000000".to_string(),
            game_id: "celeste".to_string(),
            game_name: "Celeste".to_string(),
            display_name: "Before chapter 7".to_string(),
            notes: String::new(),
            timestamp: Local::now(),
            archive_path: PathBuf::from("/b/games/celeste/1700000000000.tar.gz"),
            size: 512,
            profile_name: String::new(),
            profile_id: FULL_BACKUP_PROFILE_ID,
        };

        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "id", "gameId", "gameName", "displayName", "notes", "timestamp",
            "archivePath", "size", "profileName", "profileId",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(json["profileId"], -1);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{
            "id": "42",
            "gameId": "hades",
            "timestamp": "2024-05-01T10:00:00+02:00",
            "archivePath": "/b/games/hades/42.tar.gz"
        }"#;
        let record: BackupRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_full_backup());
        assert_eq!(record.size, 0);
        assert!(record.notes.is_empty());
        assert_eq!(
            record.metadata_path(),
            PathBuf::from("/b/games/hades/42.tar.gz.json")
        );
    }

    #[test]
    fn test_default_display_name_format() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T18:22:05+00:00")
            .unwrap()
            .with_timezone(&Local);
        let name = default_display_name(&ts);
        assert_eq!(name.len(), "YYYY-MM-DD HH:MM:SS".len());
        assert!(name.contains('-') && name.contains(':'));
    }
}
