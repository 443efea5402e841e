//! VFS error types.
//!
//! Every failure carries a human-readable message and belongs to one of two
//! kinds (see [`ErrorKind`]). "Not found" is never an error: lookups return
//! `Ok(None)` for absent paths.

use std::io;
use thiserror::Error;

/// The two failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller misuse: wrong entry type, missing capability, invalid argument.
    /// Avoidable by checking `entry_type()` / `supported_operations()` first.
    InvalidOperation,
    /// An underlying resource failed. May be transient.
    FileSystem,
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The filesystem lacks the capability for this operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("not a file: {0}")]
    WrongType(String),

    /// Only directories and files can be created.
    #[error("invalid entry type: {0}")]
    InvalidType(String),

    /// A node of a different type already occupies the name.
    #[error("type conflict: {0}")]
    TypeConflict(String),

    /// Invalid path argument (empty name, root where a child is required).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Backend failure: corrupt data, collisions, nothing could serve the path.
    #[error("{0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Create an Unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create a WrongType error.
    pub fn wrong_type(path: impl Into<String>) -> Self {
        Self::WrongType(path.into())
    }

    /// Create an InvalidType error.
    pub fn invalid_type(msg: impl Into<String>) -> Self {
        Self::InvalidType(msg.into())
    }

    /// Create a TypeConflict error.
    pub fn type_conflict(path: impl Into<String>) -> Self {
        Self::TypeConflict(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create a Backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Which of the two failure kinds this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::Unsupported(_)
            | VfsError::NotADirectory(_)
            | VfsError::WrongType(_)
            | VfsError::InvalidType(_)
            | VfsError::TypeConflict(_)
            | VfsError::InvalidPath(_)
            | VfsError::PathEscapesRoot(_) => ErrorKind::InvalidOperation,
            VfsError::Backend(_) | VfsError::Io(_) => ErrorKind::FileSystem,
        }
    }

    /// Returns true for caller-misuse errors.
    pub fn is_invalid_operation(&self) -> bool {
        self.kind() == ErrorKind::InvalidOperation
    }

    /// Returns true for backend failures.
    pub fn is_filesystem(&self) -> bool {
        self.kind() == ErrorKind::FileSystem
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Unsupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::WrongType(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::InvalidType(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::TypeConflict(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::Backend(msg) => io::Error::other(msg),
            VfsError::Io(e) => e,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            VfsError::unsupported("write").kind(),
            ErrorKind::InvalidOperation
        );
        assert!(VfsError::not_a_directory("a").is_invalid_operation());
        assert!(VfsError::wrong_type("a").is_invalid_operation());
        assert!(VfsError::invalid_type("unknown").is_invalid_operation());
        assert!(VfsError::type_conflict("a").is_invalid_operation());
        assert!(VfsError::path_escapes_root("..").is_invalid_operation());
        assert!(VfsError::backend("corrupt").is_filesystem());
        assert!(VfsError::from(io::Error::other("boom")).is_filesystem());
    }

    #[test]
    fn test_into_io_error() {
        let e: io::Error = VfsError::not_a_directory("docs/a.txt").into();
        assert_eq!(e.kind(), io::ErrorKind::NotADirectory);

        let e: io::Error = VfsError::backend("corrupt archive").into();
        assert_eq!(e.kind(), io::ErrorKind::Other);
        assert_eq!(e.to_string(), "corrupt archive");
    }
}
