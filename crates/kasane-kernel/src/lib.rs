//! # kasane-kernel
//!
//! The union filesystem engine and the storage backends it stacks.
//!
//! A union stacks an ordered list of filesystems into one merged namespace.
//! Earlier filesystems shadow later ones, merged listings are cached per
//! directory, and reads, writes, deletes and creates fall back across the
//! stack according to each backend's advertised capabilities.
//!
//! ```no_run
//! use kasane_kernel::vfs::{FileSystem, LocalFileSystem, UnionFileSystem};
//! use kasane_types::Operations;
//!
//! let overlay = LocalFileSystem::new("./mods");
//! let base = LocalFileSystem::new("./base");
//! base.set_allowed_operations(Operations::READ);
//!
//! let union = UnionFileSystem::new();
//! union.add_backend(overlay);
//! union.add_backend(base);
//! union.populate(2)?;
//!
//! let readme = union.entry("docs/readme.md")?;
//! # Ok::<(), kasane_types::VfsError>(())
//! ```

pub mod config;
pub mod vfs;

pub use config::{BackendKind, BackendSpec, ConfigError, UnionManifest};
pub use vfs::{Entry, FileSystem, InvalidationPolicy, UnionEntry, UnionFileSystem};
