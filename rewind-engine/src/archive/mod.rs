//! The tar.gz container: entry headers (path, type, mode, mtime, size)
//! followed by their payloads, gzip-compressed as one stream.

pub mod reader;
pub mod writer;

pub use writer::ArchiveWriter;

/// Counts reported by a write, extract or scan pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Entries written or read, directories and links included
    pub entries: usize,

    /// Payload bytes of regular files
    pub bytes: u64,
}
