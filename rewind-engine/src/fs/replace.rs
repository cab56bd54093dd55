//! Putting extracted content in place of a live save directory.
//!
//! `replace_directory` swaps a whole tree, keeping the previous tree aside
//! until the new one is complete. `copy_tree` overlays one tree onto another
//! and leaves entries it does not carry untouched.

use super::metadata::{EntryKind, EntryMetadata};
use super::walker::walk_tree_with_callback;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Replace `target` with `source`, wholesale.
///
/// The old tree is renamed to a hidden sibling first and only removed once
/// the new tree is fully in place; on failure it is renamed back.
pub fn replace_directory(source: &Path, target: &Path) -> io::Result<()> {
    let stash = if fs::symlink_metadata(target).is_ok() {
        let stash = stash_path(target);
        fs::rename(target, &stash)?;
        debug!("Moved {} aside to {}", target.display(), stash.display());
        Some(stash)
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        None
    };

    match move_tree(source, target) {
        Ok(()) => {
            if let Some(stash) = stash {
                if let Err(e) = remove_entry(&stash) {
                    warn!("Failed to remove previous save directory {}: {}", stash.display(), e);
                }
            }
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = remove_entry(target) {
                warn!("Failed to remove partial restore at {}: {}", target.display(), cleanup);
            }
            if let Some(stash) = stash {
                if let Err(rollback) = fs::rename(&stash, target) {
                    error!(
                        "Could not put previous save directory back ({} -> {}): {}",
                        stash.display(),
                        target.display(),
                        rollback
                    );
                }
            }
            Err(e)
        }
    }
}

/// Move a tree, falling back to a copy when a rename is not possible
/// (typically across filesystems)
pub fn move_tree(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                "Rename {} -> {} failed ({}), copying instead",
                source.display(),
                target.display(),
                e
            );
            copy_tree(source, target)
        }
    }
}

/// Copy every entry of `source` into `target`, overwriting entries with the
/// same relative path and leaving all others alone
pub fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    // Directory mtimes change as children land, so they are applied last.
    // The root keeps the target's own attributes.
    let mut directories: Vec<(PathBuf, EntryMetadata)> = Vec::new();

    walk_tree_with_callback(source, Path::new(""), |entry| {
        let dest = target.join(&entry.relative_path);

        match entry.metadata.kind {
            EntryKind::Directory => {
                if let Ok(existing) = fs::symlink_metadata(&dest) {
                    if !existing.is_dir() {
                        fs::remove_file(&dest)?;
                    }
                }
                fs::create_dir_all(&dest)?;
                if entry.depth > 0 {
                    directories.push((dest, entry.metadata));
                }
            }
            EntryKind::File => {
                clear_destination(&dest)?;
                fs::copy(&entry.path, &dest)?;
                entry.metadata.apply_to_path(&dest)?;
            }
            EntryKind::Symlink => {
                clear_destination(&dest)?;
                if let Some(link_target) = &entry.metadata.link_target {
                    create_symlink(link_target, &dest)?;
                    entry.metadata.apply_to_path(&dest)?;
                }
            }
            EntryKind::Other => {
                warn!("Skipping special file {}", entry.path.display());
            }
        }
        Ok(())
    })?;

    for (path, metadata) in directories.iter().rev() {
        metadata.apply_to_path(path)?;
    }

    Ok(())
}

/// Remove a file, symlink or directory tree; a missing path is not an error
pub fn remove_entry(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn clear_destination(dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    remove_entry(dest)
}

fn stash_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "save".to_string());
    target.with_file_name(format!(
        ".{}.rewind-old-{}",
        name,
        chrono::Utc::now().timestamp_millis()
    ))
}

#[cfg(unix)]
fn create_symlink(link_target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_target, link)
}

#[cfg(windows)]
fn create_symlink(link_target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(link_target, link)
}
