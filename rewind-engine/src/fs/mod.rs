//! File system helpers shared by the archive writer and restore paths.

pub mod metadata;
pub mod replace;
pub mod walker;

pub use metadata::{EntryKind, EntryMetadata};
