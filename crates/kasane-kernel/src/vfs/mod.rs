//! Virtual filesystem abstraction.
//!
//! Key components:
//!
//! - [`FileSystem`] / [`Entry`] - The contract every provider implements
//! - [`UnionFileSystem`] - Stacks providers into one merged namespace
//! - [`MemoryFileSystem`] - In-memory tree (testing, embedded assets)
//! - [`LocalFileSystem`] - A directory on disk (with path security)
//! - [`ArchiveFileSystem`] - Read-only view over an archive index
//!
//! ## Design Decisions
//!
//! - **Entries are handles**: an entry is a path plus a shared reference to
//!   its filesystem's state. Handles stay valid across mutations; a handle
//!   whose node has gone away reports [`EntryType::Unknown`].
//! - **Synchronous**: every call blocks until the backend answers. There
//!   are no suspension points anywhere in the engine.
//! - **Not found is not an error**: `child()` returns `Ok(None)`.
//!
//! [`EntryType::Unknown`]: kasane_types::EntryType::Unknown

pub mod backends;
pub mod conformance;
mod ops;
mod stream;
pub mod union;

pub use backends::{
    ArchiveFileSystem, ArchiveReader, ArchiveRecord, LocalFileSystem, MemoryFileSystem,
    StoredArchive,
};
pub use ops::{ByteStream, Entry, FileSystem, required_for_open, resolve};
pub use stream::BufferStream;
pub use union::{InvalidationPolicy, UnionEntry, UnionFileSystem};
