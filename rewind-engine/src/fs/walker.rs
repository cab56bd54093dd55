//! Depth-first directory traversal for archiving and tree copies.
//!
//! A directory is always yielded before its children, children in file-name
//! order, so the archive is written in a single streaming pass.

use super::metadata::EntryMetadata;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// An entry discovered during walking
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Full path on disk
    pub path: PathBuf,

    /// Path relative to the walk root, joined onto the caller's prefix
    pub relative_path: PathBuf,

    pub metadata: EntryMetadata,

    /// Depth below the walk root (root itself is 0)
    pub depth: usize,
}

/// Walk `root` and hand every entry to `callback`, root included.
///
/// `prefix` is prepended to every relative path; the root entry's relative
/// path is `prefix` itself (empty when no prefix is given). Symlinks are
/// reported, never followed.
pub fn walk_tree_with_callback<F>(root: &Path, prefix: &Path, mut callback: F) -> std::io::Result<()>
where
    F: FnMut(TreeEntry) -> std::io::Result<()>,
{
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path().to_path_buf();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let relative_path = if relative.as_os_str().is_empty() {
            prefix.to_path_buf()
        } else {
            prefix.join(relative)
        };

        let metadata = EntryMetadata::from_path(&path)?;

        callback(TreeEntry {
            path,
            relative_path,
            metadata,
            depth: entry.depth(),
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::metadata::EntryKind;
    use std::fs;
    use tempfile::TempDir;

    fn walk_tree(root: &Path, prefix: &Path) -> std::io::Result<Vec<TreeEntry>> {
        let mut entries = Vec::new();
        walk_tree_with_callback(root, prefix, |entry| {
            entries.push(entry);
            Ok(())
        })?;
        Ok(entries)
    }

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let entries = walk_tree(temp_dir.path(), Path::new(""))?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata.kind, EntryKind::Directory);
        assert_eq!(entries[0].depth, 0);
        Ok(())
    }

    #[test]
    fn test_directory_precedes_children() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("slots"))?;
        fs::write(temp_dir.path().join("slots/slot1.sav"), b"one")?;
        fs::write(temp_dir.path().join("options.ini"), b"volume=3")?;

        let entries = walk_tree(temp_dir.path(), Path::new("SaveData"))?;
        let names: Vec<_> = entries
            .iter()
            .map(|e| e.relative_path.to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(
            names,
            vec![
                "SaveData",
                "SaveData/options.ini",
                "SaveData/slots",
                "SaveData/slots/slot1.sav",
            ]
        );
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinked_directory_not_descended() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let outside = TempDir::new()?;
        fs::write(outside.path().join("secret.txt"), b"x")?;
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link"))?;

        let entries = walk_tree(temp_dir.path(), Path::new(""))?;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].metadata.kind, EntryKind::Symlink);
        Ok(())
    }
}
