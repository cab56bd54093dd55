//! Serializes a save directory, or a profile's subset of it, into a
//! gzip-compressed tar archive.
//!
//! Output is streamed into `<archive>.partial` and renamed into place only
//! once the gzip trailer is flushed, so a crash or error never leaves a
//! truncated archive under the final name.

use super::ArchiveSummary;
use crate::config::is_valid_compression_level;
use crate::fs::metadata::{EntryKind, EntryMetadata};
use crate::fs::walker::{walk_tree_with_callback, TreeEntry};
use crate::utils::errors::{EngineError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tracing::{debug, info, warn};

const PARTIAL_SUFFIX: &str = ".partial";

/// Writes archives at a fixed compression level
#[derive(Debug, Clone, Copy)]
pub struct ArchiveWriter {
    level: u32,
}

impl ArchiveWriter {
    /// `level` outside 1-9 falls back to the default level
    pub fn new(level: u32) -> Self {
        let level = if is_valid_compression_level(level) {
            level
        } else {
            Compression::default().level()
        };
        Self { level }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Archive a whole directory.
    ///
    /// The directory's own name is the archive's single top-level entry, so
    /// the archive unpacks to `<name>/...` regardless of where it was taken.
    pub fn write_directory(&self, source_dir: &Path, archive_path: &Path) -> Result<ArchiveSummary> {
        let walk_root = match fs::metadata(source_dir) {
            Ok(meta) if meta.is_dir() => fs::canonicalize(source_dir)?,
            Ok(_) => {
                return Err(EngineError::Validation(format!(
                    "Save path is not a directory: {}",
                    source_dir.display()
                )))
            }
            Err(_) => return Err(EngineError::NotFound(source_dir.to_path_buf())),
        };
        // Named after the path as given, even when it is a link to elsewhere.
        let top_level = PathBuf::from(
            source_dir
                .file_name()
                .or_else(|| walk_root.file_name())
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| OsString::from("save")),
        );

        info!(
            "Archiving directory {} into {} (level {})",
            walk_root.display(),
            archive_path.display(),
            self.level
        );

        self.write_with(archive_path, |builder, summary| {
            walk_tree_with_callback(&walk_root, &top_level, |entry| {
                append_entry(builder, &entry, summary)
            })
        })
    }

    /// Archive only the listed paths, relative to `base_dir`.
    ///
    /// Listed paths that are missing are skipped with a warning; if none of
    /// them exist nothing is written and `EmptyProfile` is returned.
    pub fn write_files(
        &self,
        base_dir: &Path,
        relative_paths: &[String],
        archive_path: &Path,
    ) -> Result<ArchiveSummary> {
        let mut seen = HashSet::new();
        let mut present: Vec<PathBuf> = Vec::new();

        for rel in relative_paths {
            let rel_path = PathBuf::from(rel);
            if !is_plain_relative(&rel_path) {
                warn!("Profile path is not a plain relative path, skipping: {}", rel);
                continue;
            }
            if !seen.insert(rel_path.clone()) {
                continue;
            }
            if fs::symlink_metadata(base_dir.join(&rel_path)).is_ok() {
                present.push(rel_path);
            } else {
                warn!(
                    "Profile file not found, skipping: {}",
                    base_dir.join(&rel_path).display()
                );
            }
        }

        if present.is_empty() {
            return Err(EngineError::EmptyProfile(base_dir.to_path_buf()));
        }

        info!(
            "Archiving {} of {} profile path(s) from {} into {}",
            present.len(),
            relative_paths.len(),
            base_dir.display(),
            archive_path.display()
        );

        self.write_with(archive_path, |builder, summary| {
            for rel in &present {
                let full = base_dir.join(rel);
                let metadata = EntryMetadata::from_path(&full)?;
                if metadata.kind == EntryKind::Directory {
                    walk_tree_with_callback(&full, rel, |entry| append_entry(builder, &entry, summary))?;
                } else {
                    let entry = TreeEntry {
                        path: full,
                        relative_path: rel.clone(),
                        metadata,
                        depth: 0,
                    };
                    append_entry(builder, &entry, summary)?;
                }
            }
            Ok(())
        })
    }

    /// Open the partial file, run `fill`, finish the stream and move it into
    /// place. The partial file is removed on any failure.
    fn write_with<F>(&self, archive_path: &Path, fill: F) -> Result<ArchiveSummary>
    where
        F: FnOnce(&mut Builder<GzEncoder<BufWriter<File>>>, &mut ArchiveSummary) -> io::Result<()>,
    {
        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(archive_path);

        let result = (|| -> io::Result<ArchiveSummary> {
            let file = File::create(&partial)?;
            let encoder = GzEncoder::new(BufWriter::new(file), Compression::new(self.level));
            let mut builder = Builder::new(encoder);
            builder.follow_symlinks(false);

            let mut summary = ArchiveSummary::default();
            fill(&mut builder, &mut summary)?;

            let encoder = builder.into_inner()?;
            let mut writer = encoder.finish()?;
            writer.flush()?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            drop(file);

            fs::rename(&partial, archive_path)?;
            Ok(summary)
        })();

        match result {
            Ok(summary) => {
                debug!(
                    "Wrote {} entries ({} bytes) to {}",
                    summary.entries,
                    summary.bytes,
                    archive_path.display()
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        warn!("Failed to remove partial archive {}: {}", partial.display(), cleanup);
                    }
                }
                Err(EngineError::archive("Failed to write archive", archive_path, e))
            }
        }
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new(Compression::default().level())
    }
}

/// Append one entry with its own header type
fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    entry: &TreeEntry,
    summary: &mut ArchiveSummary,
) -> io::Result<()> {
    let meta = &entry.metadata;
    let mut header = Header::new_gnu();
    header.set_mode(meta.mode);
    header.set_mtime(meta.modified);

    match meta.kind {
        EntryKind::Directory => {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &entry.relative_path, io::empty())?;
        }
        EntryKind::File => {
            let file = File::open(&entry.path)?;
            // Size comes from the open handle; `take` keeps a growing file
            // from overrunning its header.
            let len = file.metadata()?.len();
            header.set_entry_type(EntryType::Regular);
            header.set_size(len);
            builder.append_data(&mut header, &entry.relative_path, file.take(len))?;
            summary.bytes += len;
        }
        EntryKind::Symlink => {
            let target = meta.link_target.as_deref().unwrap_or_else(|| Path::new(""));
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &entry.relative_path, target)?;
        }
        EntryKind::Other => {
            warn!("Skipping special file {}", entry.path.display());
            return Ok(());
        }
    }

    summary.entries += 1;
    debug!("Added {}", entry.relative_path.display());
    Ok(())
}

fn partial_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
