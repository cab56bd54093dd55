//! Backup orchestration - sequences catalog lookups, archive writes and
//! reads, and metadata persistence into the engine's operations.
//!
//! Create and restore share one single-flight gate (see [`state`]). Their
//! archive I/O runs either inline (`create_backup`, `restore_backup`) or on
//! the tokio blocking pool (`*_async`). Both end in the same completion
//! step: check for cancellation, commit or discard, return to Idle, then
//! publish. For `*_async` that step runs on the pool thread too, since
//! applying a restore is blocking I/O; the gate mutex is the only state it
//! writes.

pub(crate) mod jobs;
pub mod state;

pub use state::Operation;

use crate::archive::{reader, ArchiveSummary, ArchiveWriter};
use crate::catalog::{is_valid_id, BackupCatalog};
use crate::config::{is_valid_compression_level, Config};
use crate::events::{EngineEvent, EventBus};
use crate::models::backup_record::default_display_name;
use crate::models::{BackupOptions, BackupRecord, Game, FULL_BACKUP_PROFILE_ID};
use crate::utils::errors::{EngineError, Result};
use chrono::Local;
use jobs::{CreateJob, RestoreJob};
use state::{OperationGate, OperationGuard};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Settings {
    backup_dir: PathBuf,
    compression_level: u32,
}

struct Inner {
    settings: RwLock<Settings>,
    gate: OperationGate,
    events: EventBus,
}

/// Entry point of the engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BackupManager {
    inner: Arc<Inner>,
}

/// A create or restore running on the blocking pool
pub struct OperationHandle<T> {
    handle: JoinHandle<Result<T>>,
}

impl<T> OperationHandle<T> {
    /// Wait for the operation's completion step to finish
    pub async fn wait(self) -> Result<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Task(e.to_string())),
        }
    }
}

impl BackupManager {
    /// Create a manager rooted at the configured backup directory, creating
    /// it if needed
    pub fn new(config: &Config) -> Result<Self> {
        let backup_dir = config.storage.backup_dir.clone();
        fs::create_dir_all(&backup_dir)?;

        let compression_level = if is_valid_compression_level(config.archive.compression_level) {
            config.archive.compression_level
        } else {
            warn!(
                "Ignoring invalid compression level {}",
                config.archive.compression_level
            );
            ArchiveWriter::default().level()
        };

        info!("Backup directory: {}", backup_dir.display());

        Ok(Self {
            inner: Arc::new(Inner {
                settings: RwLock::new(Settings {
                    backup_dir,
                    compression_level,
                }),
                gate: OperationGate::new(),
                events: EventBus::new(),
            }),
        })
    }

    fn settings(&self) -> RwLockReadGuard<'_, Settings> {
        self.inner.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_backup_directory(&self, dir: impl Into<PathBuf>) -> Result<()> {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            return Err(self.report(e.into()));
        }
        info!("Backup directory set to {}", dir.display());
        self.inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .backup_dir = dir;
        Ok(())
    }

    pub fn backup_directory(&self) -> PathBuf {
        self.settings().backup_dir.clone()
    }

    /// Levels outside 1-9 are ignored
    pub fn set_compression_level(&self, level: u32) {
        if !is_valid_compression_level(level) {
            warn!("Ignoring invalid compression level {}", level);
            return;
        }
        self.inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .compression_level = level;
    }

    pub fn compression_level(&self) -> u32 {
        self.settings().compression_level
    }

    pub fn is_busy(&self) -> bool {
        self.inner.gate.is_busy()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn catalog(&self) -> BackupCatalog {
        BackupCatalog::new(self.backup_directory())
    }

    pub fn backups_for_game(&self, game_id: &str) -> Vec<BackupRecord> {
        self.catalog().list(game_id)
    }

    pub fn backup_by_id(&self, game_id: &str, backup_id: &str) -> Option<BackupRecord> {
        self.catalog().find(game_id, backup_id)
    }

    pub fn game_ids_with_backups(&self) -> Vec<String> {
        self.catalog().game_ids_with_backups()
    }

    pub fn game_name_from_backups(&self, game_id: &str) -> String {
        self.catalog().game_name_from_backups(game_id)
    }

    /// Flag the in-flight operation for cancellation. The work itself is
    /// not interrupted; its result is discarded when it completes.
    pub fn cancel_operation(&self) -> bool {
        self.inner.gate.cancel()
    }

    pub fn create_backup(&self, game: &Game, options: BackupOptions) -> Result<BackupRecord> {
        let (job, guard) = self.start_create(game, options)?;
        let outcome = job.run();
        self.finish_create(job, outcome, guard)
    }

    /// Must be called from within a tokio runtime
    pub fn create_backup_async(
        &self,
        game: &Game,
        options: BackupOptions,
    ) -> Result<OperationHandle<BackupRecord>> {
        let runtime = self.runtime()?;
        let (job, guard) = self.start_create(game, options)?;

        let manager = self.clone();
        let handle = runtime.spawn_blocking(move || {
            let outcome = job.run();
            manager.finish_create(job, outcome, guard)
        });
        Ok(OperationHandle { handle })
    }

    fn start_create(&self, game: &Game, options: BackupOptions) -> Result<(CreateJob, OperationGuard)> {
        if let Err(e) = validate_create(game, &options) {
            return Err(self.report(e));
        }

        let label = format!("Creating backup for {}", game_label(game));
        let mut guard = self.begin(Operation::Create, label)?;
        let job = self.create_job(game, options);
        guard.track_backup(&job.record.game_id, &job.record.id);
        guard.announce();
        Ok((job, guard))
    }

    fn create_job(&self, game: &Game, options: BackupOptions) -> CreateJob {
        let settings = self.settings();
        let catalog = BackupCatalog::new(&settings.backup_dir);
        let now = Local::now();
        let id = catalog.next_backup_id(&game.id, &now);

        let (profile_id, profile_name, files) = match options.profile {
            Some(profile) => (profile.id, profile.name, Some(profile.files)),
            None => (FULL_BACKUP_PROFILE_ID, String::new(), None),
        };
        let display_name = options
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_display_name(&now));

        CreateJob {
            record: BackupRecord {
                archive_path: catalog.archive_path(&game.id, &id),
                id,
                game_id: game.id.clone(),
                game_name: game.name.clone(),
                display_name,
                notes: options.notes,
                timestamp: now,
                size: 0,
                profile_name,
                profile_id,
            },
            source: game.detected_save_path.clone(),
            files,
            writer: ArchiveWriter::new(settings.compression_level),
        }
    }

    fn finish_create(
        &self,
        job: CreateJob,
        outcome: Result<ArchiveSummary>,
        guard: OperationGuard,
    ) -> Result<BackupRecord> {
        let result = if guard.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            outcome.and_then(|summary| self.commit_create(&job, summary))
        };

        if result.is_err() {
            job.discard();
        }

        self.settle(guard, result, |record| EngineEvent::BackupCreated {
            game_id: record.game_id.clone(),
            backup_id: record.id.clone(),
        })
    }

    /// Record the archive size and persist the sidecar. The caller removes
    /// the archive if this fails.
    fn commit_create(&self, job: &CreateJob, summary: ArchiveSummary) -> Result<BackupRecord> {
        let mut record = job.record.clone();
        record.size = fs::metadata(&record.archive_path)?.len();
        self.catalog().write_record(&record)?;

        info!(
            "Created backup {} of {} ({} entries, {} bytes compressed)",
            record.id, record.game_id, summary.entries, record.size
        );
        Ok(record)
    }

    /// Restore `record` into `target`. A full backup replaces `target`
    /// wholesale; a profile backup only overwrites the files it carries.
    pub fn restore_backup(&self, record: &BackupRecord, target: &Path) -> Result<()> {
        let (job, guard) = self.start_restore(record, target)?;
        let outcome = job.run();
        self.finish_restore(job, outcome, guard)
    }

    /// Must be called from within a tokio runtime
    pub fn restore_backup_async(&self, record: &BackupRecord, target: &Path) -> Result<OperationHandle<()>> {
        let runtime = self.runtime()?;
        let (job, guard) = self.start_restore(record, target)?;

        let manager = self.clone();
        let handle = runtime.spawn_blocking(move || {
            let outcome = job.run();
            manager.finish_restore(job, outcome, guard)
        });
        Ok(OperationHandle { handle })
    }

    fn start_restore(&self, record: &BackupRecord, target: &Path) -> Result<(RestoreJob, OperationGuard)> {
        if target.as_os_str().is_empty() {
            return Err(self.report(EngineError::Validation(
                "Restore target path is empty".to_string(),
            )));
        }
        if !record.archive_path.is_file() {
            return Err(self.report(EngineError::NotFound(record.archive_path.clone())));
        }

        let label = format!("Restoring backup {}", record.display_name);
        let mut guard = self.begin(Operation::Restore, label)?;
        let job = match RestoreJob::new(record.clone(), target.to_path_buf(), &self.backup_directory()) {
            Ok(job) => job,
            Err(e) => return Err(self.report(e)),
        };
        guard.track_backup(&record.game_id, &record.id);
        guard.announce();
        Ok((job, guard))
    }

    fn finish_restore(
        &self,
        job: RestoreJob,
        outcome: Result<ArchiveSummary>,
        guard: OperationGuard,
    ) -> Result<()> {
        let game_id = job.record.game_id.clone();
        let backup_id = job.record.id.clone();
        let target = job.target.clone();

        let result = if guard.is_cancelled() {
            job.discard();
            Err(EngineError::Cancelled)
        } else {
            match outcome {
                Ok(summary) => {
                    debug!("Staged {} entries ({} bytes)", summary.entries, summary.bytes);
                    job.apply()
                }
                Err(e) => {
                    job.discard();
                    Err(e)
                }
            }
        };

        if result.is_ok() {
            info!("Restored backup {} into {}", backup_id, target.display());
        }

        self.settle(guard, result, |_| EngineEvent::BackupRestored { game_id, backup_id })
    }

    /// Remove a backup's archive and sidecar. Files already gone are fine;
    /// any file that exists but cannot be removed fails the call.
    pub fn delete_backup(&self, record: &BackupRecord) -> Result<()> {
        if self.inner.gate.is_using(&record.game_id, &record.id) {
            return Err(self.report(EngineError::Busy));
        }

        let mut failure: Option<(PathBuf, io::Error)> = None;
        for path in [record.archive_path.clone(), record.metadata_path()] {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound && failure.is_none() {
                    failure = Some((path, e));
                }
            }
        }

        if let Some((path, first)) = failure {
            let message = format!(
                "Failed to delete backup {} ({}): {}",
                record.id,
                path.display(),
                first
            );
            return Err(self.report(EngineError::Io(io::Error::new(first.kind(), message))));
        }

        info!("Deleted backup {} of {}", record.id, record.game_id);
        self.inner.events.publish(EngineEvent::BackupDeleted {
            game_id: record.game_id.clone(),
            backup_id: record.id.clone(),
        });
        Ok(())
    }

    /// Rewrite a backup's sidecar, e.g. after a rename or new notes
    pub fn update_backup_metadata(&self, record: &BackupRecord) -> Result<()> {
        if !record.archive_path.is_file() {
            return Err(self.report(EngineError::NotFound(record.archive_path.clone())));
        }
        if let Err(e) = self.catalog().write_record(record) {
            return Err(self.report(e));
        }

        info!("Updated metadata of backup {}", record.id);
        self.inner.events.publish(EngineEvent::BackupUpdated {
            game_id: record.game_id.clone(),
            backup_id: record.id.clone(),
        });
        Ok(())
    }

    /// Decode the whole archive without writing anything. Corruption is a
    /// `false` result, not an error.
    pub fn verify_backup(&self, record: &BackupRecord) -> bool {
        let valid = if !record.archive_path.is_file() {
            warn!("Archive of backup {} is missing: {}", record.id, record.archive_path.display());
            false
        } else {
            match reader::scan(&record.archive_path) {
                Ok(summary) => {
                    info!(
                        "Backup {} verified: {} entries, {} bytes",
                        record.id, summary.entries, summary.bytes
                    );
                    true
                }
                Err(e) => {
                    warn!("Backup {} failed verification: {}", record.id, e);
                    false
                }
            }
        };

        self.inner.events.publish(EngineEvent::BackupVerified {
            game_id: record.game_id.clone(),
            backup_id: record.id.clone(),
            valid,
        });
        valid
    }

    fn begin(&self, operation: Operation, label: String) -> Result<OperationGuard> {
        self.inner
            .gate
            .try_begin(operation, &self.inner.events, label)
            .map_err(|e| self.report(e))
    }

    fn runtime(&self) -> Result<tokio::runtime::Handle> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| self.report(EngineError::Task(e.to_string())))
    }

    /// Return to Idle and publish the outcome, then `finished`
    fn settle<T>(
        &self,
        guard: OperationGuard,
        result: Result<T>,
        success: impl FnOnce(&T) -> EngineEvent,
    ) -> Result<T> {
        let outcome = match &result {
            Ok(value) => success(value),
            Err(EngineError::Cancelled) => {
                info!("{} cancelled", guard.label());
                EngineEvent::OperationCancelled {
                    label: guard.label().to_string(),
                }
            }
            Err(e) => {
                error!("{} failed: {}", guard.label(), e);
                EngineEvent::Error {
                    message: e.to_string(),
                }
            }
        };
        guard.complete(outcome);
        result
    }

    /// Log and publish an error raised before any work was scheduled
    fn report(&self, err: EngineError) -> EngineError {
        match &err {
            EngineError::Busy => warn!("{}", err),
            _ => error!("{}", err),
        }
        self.inner.events.publish(EngineEvent::Error {
            message: err.to_string(),
        });
        err
    }
}

fn validate_create(game: &Game, options: &BackupOptions) -> Result<()> {
    if !game.is_detected || game.detected_save_path.as_os_str().is_empty() {
        return Err(EngineError::Validation(format!(
            "No save directory detected for {}",
            game_label(game)
        )));
    }
    if !is_valid_id(&game.id) {
        return Err(EngineError::Validation(format!("Invalid game id {:?}", game.id)));
    }
    if !game.detected_save_path.exists() {
        return Err(EngineError::Validation(format!(
            "Save directory does not exist: {}",
            game.detected_save_path.display()
        )));
    }
    if let Some(profile) = &options.profile {
        if profile.id == FULL_BACKUP_PROFILE_ID {
            return Err(EngineError::Validation(format!(
                "Profile id {} is reserved for full backups",
                FULL_BACKUP_PROFILE_ID
            )));
        }
        if profile.files.is_empty() {
            return Err(EngineError::Validation(format!(
                "Profile {:?} lists no files",
                profile.name
            )));
        }
    }
    Ok(())
}

fn game_label(game: &Game) -> &str {
    if game.name.is_empty() {
        &game.id
    } else {
        &game.name
    }
}
