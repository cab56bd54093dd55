//! Entry metadata captured for archiving and re-applied on restore.
//!
//! Symlinks are described, never followed.

use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Entry types the archive format preserves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    /// Sockets, fifos, devices; skipped by the writer
    Other,
}

/// Metadata for one filesystem entry
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub kind: EntryKind,

    /// Payload size in bytes (0 for directories and symlinks)
    pub size: u64,

    /// Last modified time (seconds since Unix epoch)
    pub modified: u64,

    /// Unix mode bits, permission part only
    pub mode: u32,

    /// Target of a symlink, as stored in the link
    pub link_target: Option<PathBuf>,
}

impl EntryMetadata {
    /// Read metadata without following a trailing symlink
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let file_type = metadata.file_type();

        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        let modified = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let link_target = if kind == EntryKind::Symlink {
            Some(fs::read_link(path)?)
        } else {
            None
        };

        Ok(Self {
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            modified,
            mode: mode_of(&metadata, kind),
            link_target,
        })
    }

    /// Apply permissions and mtime to an already-created entry
    pub fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        let mtime = FileTime::from_unix_time(self.modified as i64, 0);

        if self.kind == EntryKind::Symlink {
            return filetime::set_symlink_file_times(path, mtime, mtime);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(self.mode))?;
        }

        filetime::set_file_times(path, mtime, mtime)
    }
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata, _kind: EntryKind) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata, kind: EntryKind) -> u32 {
    let base = match kind {
        EntryKind::Directory => 0o755,
        _ => 0o644,
    };
    if metadata.permissions().readonly() {
        base & !0o222
    } else {
        base
    }
}
