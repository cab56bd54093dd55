//! Work handed to the blocking pool. Jobs own their inputs and return a
//! result; they never touch the engine state.

use crate::archive::{reader, ArchiveSummary, ArchiveWriter};
use crate::fs::replace::{copy_tree, replace_directory};
use crate::models::BackupRecord;
use crate::utils::errors::{EngineError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const STAGING_PREFIX: &str = "temp_restore_";

/// Archive a save directory, or the listed files of it, into
/// `record.archive_path`
pub(crate) struct CreateJob {
    pub record: BackupRecord,
    pub source: PathBuf,
    /// `None` archives the whole directory
    pub files: Option<Vec<String>>,
    pub writer: ArchiveWriter,
}

impl CreateJob {
    pub fn run(&self) -> Result<ArchiveSummary> {
        match &self.files {
            None => self.writer.write_directory(&self.source, &self.record.archive_path),
            Some(files) => self
                .writer
                .write_files(&self.source, files, &self.record.archive_path),
        }
    }

    /// Remove whatever the run left under the archive name
    pub fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.record.archive_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove archive {}: {}", self.record.archive_path.display(), e);
            }
        }
    }
}

/// Unpack an archive into a staging directory, then put the staged content
/// in place of (full) or on top of (profile) the target directory
pub(crate) struct RestoreJob {
    pub record: BackupRecord,
    pub target: PathBuf,
    staging: TempDir,
}

impl RestoreJob {
    /// Staging lives under `staging_root` so the final move stays on the
    /// same filesystem as the backups
    pub fn new(record: BackupRecord, target: PathBuf, staging_root: &Path) -> Result<Self> {
        fs::create_dir_all(staging_root)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(staging_root)?;
        debug!("Staging restore in {}", staging.path().display());
        Ok(Self {
            record,
            target,
            staging,
        })
    }

    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }

    pub fn run(&self) -> Result<ArchiveSummary> {
        reader::extract(&self.record.archive_path, self.staging.path())
    }

    /// Move the staged content into place; the staging directory is removed
    /// either way
    pub fn apply(self) -> Result<()> {
        let result = if self.record.is_full_backup() {
            self.replace_target()
        } else {
            self.overlay_target()
        };
        self.discard();
        result
    }

    pub fn discard(self) {
        let path = self.staging.path().to_path_buf();
        if let Err(e) = self.staging.close() {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove staging directory {}: {}", path.display(), e);
            }
        }
    }

    fn overlay_target(&self) -> Result<()> {
        info!(
            "Copying profile files from backup {} into {}",
            self.record.id,
            self.target.display()
        );
        fs::create_dir_all(&self.target)?;
        copy_tree(self.staging.path(), &self.target)?;
        Ok(())
    }

    fn replace_target(&self) -> Result<()> {
        if fs::read_dir(self.staging.path())?.next().is_none() {
            return Err(EngineError::Archive(format!(
                "Backup {} restored nothing, keeping {}",
                self.record.id,
                self.target.display()
            )));
        }
        let source = promoted_root(self.staging.path())?;
        if source == self.staging.path() {
            relax_staging_permissions(&source)?;
        }
        info!(
            "Replacing {} with backup {}",
            self.target.display(),
            self.record.id
        );
        replace_directory(&source, &self.target)?;
        Ok(())
    }
}

/// A full archive holds the save directory itself as its only top-level
/// entry; otherwise the staging directory stands in for it
fn promoted_root(staging: &Path) -> io::Result<PathBuf> {
    let mut entries = fs::read_dir(staging)?.collect::<io::Result<Vec<_>>>()?;
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        if let Some(entry) = entries.pop() {
            return Ok(entry.path());
        }
    }
    Ok(staging.to_path_buf())
}

#[cfg(unix)]
fn relax_staging_permissions(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn relax_staging_permissions(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FULL_BACKUP_PROFILE_ID;
    use chrono::Local;

    fn record(archive: PathBuf, profile_id: i64) -> BackupRecord {
        BackupRecord {
            id: "1".to_string(),
            game_id: "hk".to_string(),
            game_name: "Hollow Knight".to_string(),
            display_name: "x".to_string(),
            notes: String::new(),
            timestamp: Local::now(),
            archive_path: archive,
            size: 0,
            profile_name: String::new(),
            profile_id,
        }
    }

    #[test]
    fn test_promoted_root_single_directory() -> io::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("Saves"))?;
        assert_eq!(promoted_root(dir.path())?, dir.path().join("Saves"));

        fs::write(dir.path().join("stray.txt"), b"x")?;
        assert_eq!(promoted_root(dir.path())?, dir.path());
        Ok(())
    }

    #[test]
    fn test_full_restore_replaces_target() -> Result<()> {
        let work = TempDir::new()?;
        let save = work.path().join("Saves");
        fs::create_dir_all(&save)?;
        fs::write(save.join("slot1.sav"), b"original")?;

        let archive = work.path().join("1.tar.gz");
        ArchiveWriter::default().write_directory(&save, &archive)?;

        fs::write(save.join("slot1.sav"), b"changed")?;
        fs::write(save.join("newer.sav"), b"not in backup")?;

        let job = RestoreJob::new(record(archive, FULL_BACKUP_PROFILE_ID), save.clone(), work.path())?;
        let staging = job.staging_path().to_path_buf();
        job.run()?;
        job.apply()?;

        assert_eq!(fs::read(save.join("slot1.sav"))?, b"original");
        assert!(!save.join("newer.sav").exists());
        assert!(!staging.exists());
        Ok(())
    }

    #[test]
    fn test_profile_restore_overlays_target() -> Result<()> {
        let work = TempDir::new()?;
        let save = work.path().join("Saves");
        fs::create_dir_all(&save)?;
        fs::write(save.join("slot1.sav"), b"original")?;
        fs::write(save.join("options.ini"), b"untouched")?;

        let archive = work.path().join("2.tar.gz");
        ArchiveWriter::default().write_files(&save, &["slot1.sav".to_string()], &archive)?;
        fs::write(save.join("slot1.sav"), b"changed")?;

        let job = RestoreJob::new(record(archive, 3), save.clone(), work.path())?;
        job.run()?;
        job.apply()?;

        assert_eq!(fs::read(save.join("slot1.sav"))?, b"original");
        assert_eq!(fs::read(save.join("options.ini"))?, b"untouched");
        Ok(())
    }

    #[test]
    fn test_empty_staging_keeps_target() -> Result<()> {
        let work = TempDir::new()?;
        let save = work.path().join("Saves");
        fs::create_dir_all(&save)?;
        fs::write(save.join("keep.sav"), b"live progress")?;

        let job = RestoreJob::new(
            record(work.path().join("1.tar.gz"), FULL_BACKUP_PROFILE_ID),
            save.clone(),
            work.path(),
        )?;
        let staging = job.staging_path().to_path_buf();

        assert!(job.apply().is_err());
        assert_eq!(fs::read(save.join("keep.sav"))?, b"live progress");
        assert!(!staging.exists());
        Ok(())
    }

    #[test]
    fn test_discarded_create_leaves_nothing() -> Result<()> {
        let work = TempDir::new()?;
        let save = work.path().join("Saves");
        fs::create_dir_all(&save)?;
        fs::write(save.join("slot1.sav"), b"data")?;

        let job = CreateJob {
            record: record(work.path().join("games/hk/1.tar.gz"), FULL_BACKUP_PROFILE_ID),
            source: save,
            files: None,
            writer: ArchiveWriter::default(),
        };
        job.run()?;
        assert!(job.record.archive_path.exists());

        job.discard();
        assert!(!job.record.archive_path.exists());
        Ok(())
    }
}
