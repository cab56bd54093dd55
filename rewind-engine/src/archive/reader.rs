//! Reads archives back: `extract` recreates entries on disk, `scan` only
//! walks them to prove the archive decodes end to end.

use super::ArchiveSummary;
use crate::utils::errors::{EngineError, Result};
use filetime::FileTime;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;

/// Two zero blocks close every tar stream
const END_OF_ARCHIVE_LEN: u64 = 1024;

type ArchiveStream = Archive<TrailerTracker<GzDecoder<BufReader<File>>>>;

/// Counts the zero bytes at the end of what has been read so far.
///
/// tar treats a stream ending at a header boundary as a clean end, so the
/// end-of-archive blocks are checked here instead.
struct TrailerTracker<R> {
    inner: R,
    trailing_zeros: u64,
}

impl<R: Read> Read for TrailerTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        match buf[..n].iter().rposition(|&b| b != 0) {
            Some(last) => self.trailing_zeros = (n - last - 1) as u64,
            None => self.trailing_zeros += n as u64,
        }
        Ok(n)
    }
}

fn open(archive_path: &Path) -> Result<ArchiveStream> {
    let file = File::open(archive_path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            EngineError::NotFound(archive_path.to_path_buf())
        } else {
            EngineError::archive("Failed to open archive", archive_path, e)
        }
    })?;
    Ok(Archive::new(TrailerTracker {
        inner: GzDecoder::new(BufReader::new(file)),
        trailing_zeros: 0,
    }))
}

/// Drain the compressed stream so its checksum is checked, then require at
/// least one entry and the end-of-archive blocks
fn finish(archive: ArchiveStream, archive_path: &Path, summary: &ArchiveSummary) -> Result<()> {
    let mut rest = archive.into_inner();
    io::copy(&mut rest, &mut io::sink())
        .map_err(|e| EngineError::archive("Failed to read", archive_path, e))?;

    if summary.entries == 0 {
        return Err(EngineError::Archive(format!(
            "Archive {} holds no entries",
            archive_path.display()
        )));
    }
    if rest.trailing_zeros < END_OF_ARCHIVE_LEN {
        return Err(EngineError::Archive(format!(
            "Archive {} ends without an end-of-archive marker",
            archive_path.display()
        )));
    }
    Ok(())
}

/// Unpack every entry under `target_dir`, keeping types, modes and mtimes.
///
/// Fails on the first unreadable header, short payload or entry whose path
/// would land outside `target_dir`, and on archives that are empty or cut
/// short. Entries extracted before the failure are left in place.
pub fn extract(archive_path: &Path, target_dir: &Path) -> Result<ArchiveSummary> {
    let mut archive = open(archive_path)?;
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);

    fs::create_dir_all(target_dir)?;

    let fail = |e: io::Error| EngineError::archive("Failed to extract", archive_path, e);

    // Directory attributes are re-applied after their children are written.
    let mut directories: Vec<(PathBuf, u32, u64)> = Vec::new();
    let mut summary = ArchiveSummary::default();

    for entry in archive.entries().map_err(fail)? {
        let mut entry = entry.map_err(fail)?;
        let rel = entry.path().map_err(fail)?.into_owned();
        let size = entry.size();
        let is_dir = entry.header().entry_type() == EntryType::Directory;
        let mode = entry.header().mode().unwrap_or(0o755);
        let mtime = entry.header().mtime().unwrap_or(0);

        if !entry.unpack_in(target_dir).map_err(fail)? {
            return Err(EngineError::Archive(format!(
                "Entry {} in {} escapes the extraction directory",
                rel.display(),
                archive_path.display()
            )));
        }

        if is_dir {
            let dest = target_dir.join(&rel);
            ensure_owner_writable(&dest).map_err(fail)?;
            directories.push((dest, mode, mtime));
        }

        summary.entries += 1;
        summary.bytes += size;
        debug!("Extracted {}", rel.display());
    }

    finish(archive, archive_path, &summary)?;

    for (dir, mode, mtime) in directories.iter().rev() {
        restore_directory_attributes(dir, *mode, *mtime).map_err(fail)?;
    }

    Ok(summary)
}

/// Read every header and payload without writing anything
pub fn scan(archive_path: &Path) -> Result<ArchiveSummary> {
    let mut archive = open(archive_path)?;
    let fail = |e: io::Error| EngineError::archive("Failed to read", archive_path, e);

    let mut summary = ArchiveSummary::default();
    for entry in archive.entries().map_err(fail)? {
        let mut entry = entry.map_err(fail)?;
        let expected = entry.size();
        let copied = io::copy(&mut entry, &mut io::sink()).map_err(fail)?;
        if copied != expected {
            return Err(EngineError::Archive(format!(
                "Entry payload truncated in {} ({} of {} bytes)",
                archive_path.display(),
                copied,
                expected
            )));
        }
        summary.entries += 1;
        summary.bytes += copied;
    }

    finish(archive, archive_path, &summary)?;
    Ok(summary)
}

#[cfg(unix)]
fn ensure_owner_writable(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(dir)?.permissions().mode();
    if mode & 0o700 != 0o700 {
        fs::set_permissions(dir, fs::Permissions::from_mode(mode | 0o700))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_owner_writable(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn restore_directory_attributes(dir: &Path, mode: u32, mtime: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mtime = FileTime::from_unix_time(mtime as i64, 0);
    filetime::set_file_times(dir, mtime, mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::writer::ArchiveWriter;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn build_archive(work: &Path) -> Result<PathBuf> {
        let save = work.join("Saves");
        fs::create_dir_all(save.join("profiles/p1"))?;
        fs::write(save.join("profiles/p1/progress.sav"), vec![7u8; 200_000])?;
        fs::write(save.join("settings.cfg"), b"fov=90")?;
        #[cfg(unix)]
        std::os::unix::fs::symlink("settings.cfg", save.join("settings.link"))?;

        let archive = work.join("saves.tar.gz");
        ArchiveWriter::new(9).write_directory(&save, &archive)?;
        Ok(archive)
    }

    #[test]
    fn test_round_trip_preserves_content_and_links() -> Result<()> {
        let work = TempDir::new()?;
        let archive = build_archive(work.path())?;
        let out = work.path().join("restored");

        extract(&archive, &out)?;

        assert_eq!(
            fs::read(out.join("Saves/profiles/p1/progress.sav"))?,
            vec![7u8; 200_000]
        );
        assert_eq!(fs::read(out.join("Saves/settings.cfg"))?, b"fov=90");
        #[cfg(unix)]
        assert_eq!(
            fs::read_link(out.join("Saves/settings.link"))?,
            PathBuf::from("settings.cfg")
        );
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_extract_preserves_executable_bit() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let work = TempDir::new()?;
        let save = work.path().join("Saves");
        fs::create_dir_all(&save)?;
        fs::write(save.join("tool.sh"), b"#!/bin/sh\n")?;
        fs::set_permissions(save.join("tool.sh"), fs::Permissions::from_mode(0o755))?;
        fs::write(save.join("data.sav"), b"x")?;
        fs::set_permissions(save.join("data.sav"), fs::Permissions::from_mode(0o644))?;

        let archive = work.path().join("a.tar.gz");
        ArchiveWriter::default().write_directory(&save, &archive)?;
        let out = work.path().join("out");
        extract(&archive, &out)?;

        let tool = fs::metadata(out.join("Saves/tool.sh"))?.permissions().mode();
        let data = fs::metadata(out.join("Saves/data.sav"))?.permissions().mode();
        assert_eq!(tool & 0o111, 0o111);
        assert_eq!(data & 0o111, 0);
        Ok(())
    }

    #[test]
    fn test_scan_valid_archive() -> Result<()> {
        let work = TempDir::new()?;
        let archive = build_archive(work.path())?;

        let summary = scan(&archive)?;

        assert!(summary.entries >= 5);
        assert_eq!(summary.bytes, 200_000 + 6);
        Ok(())
    }

    #[test]
    fn test_scan_rejects_garbage() -> Result<()> {
        let work = TempDir::new()?;
        let archive = build_archive(work.path())?;
        fs::write(&archive, b"this is not a valid tar.gz")?;

        assert!(scan(&archive).is_err());
        Ok(())
    }

    #[test]
    fn test_scan_rejects_truncated_archive() -> Result<()> {
        let work = TempDir::new()?;
        let archive = build_archive(work.path())?;
        let bytes = fs::read(&archive)?;
        fs::write(&archive, &bytes[..bytes.len() / 2])?;

        assert!(scan(&archive).is_err());
        Ok(())
    }

    fn gzip(path: &Path, payload: &[u8]) -> io::Result<()> {
        let mut encoder = GzEncoder::new(File::create(path)?, Compression::default());
        encoder.write_all(payload)?;
        encoder.finish()?;
        Ok(())
    }

    #[test]
    fn test_empty_stream_is_rejected() -> Result<()> {
        let work = TempDir::new()?;
        let archive = work.path().join("empty.tar.gz");
        gzip(&archive, b"")?;

        assert!(scan(&archive).is_err());
        let out = work.path().join("out");
        assert!(extract(&archive, &out).is_err());
        assert_eq!(fs::read_dir(&out)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_entries_without_end_marker_are_rejected() -> Result<()> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "slot1.sav", &b"data"[..])?;
        let tar_bytes = builder.into_inner()?;

        let work = TempDir::new()?;
        let whole = work.path().join("whole.tar.gz");
        gzip(&whole, &tar_bytes)?;
        assert_eq!(scan(&whole)?.entries, 1);

        // Cut right after the entry, dropping the closing zero blocks.
        let cut = work.path().join("cut.tar.gz");
        gzip(&cut, &tar_bytes[..tar_bytes.len() - END_OF_ARCHIVE_LEN as usize])?;
        assert!(scan(&cut).is_err());
        assert!(extract(&cut, &work.path().join("out")).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_archive_is_not_found() {
        let work = TempDir::new().unwrap();
        let err = scan(&work.path().join("absent.tar.gz")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
