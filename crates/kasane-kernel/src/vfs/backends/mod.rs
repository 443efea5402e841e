//! Storage backends.
//!
//! Backends implement [`FileSystem`](crate::vfs::FileSystem) for different
//! storage types.

mod archive;
mod local;
mod memory;

pub use archive::{ArchiveFileSystem, ArchiveReader, ArchiveRecord, StoredArchive, crc32};
pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;
