//! Dependency archive codec
//!
//! A dependency archive is a gzip-compressed tar tape of directories,
//! files, and symlinks. Decoding is streaming and extraction is confined
//! to its destination directory; encoding is the inverse used by the
//! pack tool.

pub mod decode;
pub mod encode;
pub mod entry;

pub use decode::{extract_to, ArchiveDecoder, ExtractStats};
pub use encode::encode;
pub use entry::{ArchiveEntry, EntryKind};
