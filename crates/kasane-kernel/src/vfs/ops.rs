//! Filesystem and entry traits.
//!
//! Every provider, and the union itself, implements these. Paths handed
//! to an entry are relative to that entry; paths reported by an entry are
//! relative to the root of the filesystem that owns it.

use std::io::{Read, Seek, Write};
use std::sync::Arc;
use std::time::SystemTime;

use kasane_types::{EntryType, OpenMode, Operations, VfsError, VfsResult};

/// An open byte stream.
///
/// Streams are independent: dropping one never affects another opened on
/// the same entry.
pub trait ByteStream: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> ByteStream for T {}

/// A node in a filesystem tree.
pub trait Entry: Send + Sync {
    // ========================================================================
    // Identity
    // ========================================================================

    /// Normalized path, relative to the owning filesystem's root.
    fn path(&self) -> &str;

    /// Returns true for the root entry.
    fn is_root(&self) -> bool {
        self.path().is_empty()
    }

    /// What currently lives at this path. Metadata only.
    fn entry_type(&self) -> EntryType;

    /// Last modification time, `UNIX_EPOCH` if unknown.
    fn last_write_time(&self) -> SystemTime;

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Resolve a relative, possibly multi-component path beneath this entry.
    ///
    /// `Ok(None)` if any component is absent (or `name` is empty).
    /// `NotADirectory` if this entry or a non-terminal component is a file.
    fn child(&self, name: &str) -> VfsResult<Option<Arc<dyn Entry>>>;

    /// Direct children of a directory.
    fn list_children(&self) -> VfsResult<Vec<Arc<dyn Entry>>>;

    /// Number of direct children of a directory.
    fn num_children(&self) -> VfsResult<usize> {
        Ok(self.list_children()?.len())
    }

    // ========================================================================
    // Content and structure
    // ========================================================================

    /// Open the file's bytes.
    fn open(&self, mode: OpenMode) -> VfsResult<Box<dyn ByteStream>>;

    /// Remove a (possibly nested) child. Returns true iff something was removed.
    fn delete_child(&self, name: &str) -> VfsResult<bool>;

    /// Create a child, or validate that one of the same type already exists.
    ///
    /// Intermediate directories in `name` are created as needed.
    fn create_entry(&self, kind: EntryType, name: &str) -> VfsResult<Arc<dyn Entry>>;

    /// Move this entry to `new_path`, relative to the owning filesystem root.
    fn rename(&self, new_path: &str) -> VfsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Read the whole file.
    fn read_to_end(&self) -> VfsResult<Vec<u8>> {
        let mut stream = self.open(OpenMode::READ)?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Replace the file's contents.
    fn write_all(&self, data: &[u8]) -> VfsResult<()> {
        let mut stream = self.open(OpenMode::WRITE)?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for dyn Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.path())
            .field("type", &self.entry_type())
            .finish()
    }
}

/// A filesystem: a root entry plus the operations it supports.
pub trait FileSystem: Send + Sync {
    /// The root directory entry.
    fn root(&self) -> Arc<dyn Entry>;

    /// Operations this filesystem may be asked to perform.
    fn supported_operations(&self) -> Operations;

    /// Display name, for logs and provenance.
    fn name(&self) -> String;

    /// Returns true if every operation in `ops` is supported.
    fn supports(&self, ops: Operations) -> bool {
        self.supported_operations().contains(ops)
    }
}

/// Resolve `path` from a filesystem's root. The empty path is the root.
///
/// A file standing where a directory is expected reads as absent here;
/// callers that need to tell the two apart use [`Entry::child`] directly.
pub fn resolve(fs: &dyn FileSystem, path: &str) -> VfsResult<Option<Arc<dyn Entry>>> {
    if path.is_empty() {
        return Ok(Some(fs.root()));
    }
    match fs.root().child(path) {
        Ok(Some(entry)) if entry.entry_type().exists() => Ok(Some(entry)),
        Ok(_) | Err(VfsError::NotADirectory(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check that `supported` can honour `mode`, returning the required operations.
///
/// Empty modes, and modes that require nothing (`MEMORY_MAPPED` alone), are
/// rejected.
pub fn required_for_open(
    mode: OpenMode,
    supported: Operations,
    path: &str,
) -> VfsResult<Operations> {
    let required = mode.required_operations();
    if required.is_empty() {
        return Err(VfsError::unsupported(format!(
            "open mode {mode:?} requests neither read nor write: {path}"
        )));
    }
    if !supported.contains(required) {
        return Err(VfsError::unsupported(format!(
            "{} needs {} but filesystem supports {}",
            path,
            required.short(),
            supported.short()
        )));
    }
    Ok(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_for_open() {
        assert_eq!(
            required_for_open(OpenMode::READ, Operations::all(), "a").unwrap(),
            Operations::READ
        );
        assert!(required_for_open(OpenMode::WRITE, Operations::READ, "a").is_err());
        assert!(required_for_open(OpenMode::empty(), Operations::all(), "a").is_err());
        assert!(required_for_open(OpenMode::MEMORY_MAPPED, Operations::all(), "a").is_err());
        assert_eq!(
            required_for_open(
                OpenMode::READ | OpenMode::MEMORY_MAPPED,
                Operations::READ,
                "a"
            )
            .unwrap(),
            Operations::READ
        );
    }
}
