//! Local filesystem backend.
//!
//! Provides access to a real directory tree, with path security to prevent
//! escaping the root directory.

use parking_lot::RwLock;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use kasane_types::path;
use kasane_types::{EntryType, OpenMode, Operations, VfsError, VfsResult};

use crate::vfs::ops::{ByteStream, Entry, FileSystem, required_for_open};

/// State shared between the filesystem and every entry handle.
#[derive(Debug)]
struct LocalState {
    root: PathBuf,
    operations: RwLock<Operations>,
}

impl LocalState {
    fn operations(&self) -> Operations {
        *self.operations.read()
    }

    fn require(&self, ops: Operations, what: &str, path: &str) -> VfsResult<()> {
        let supported = self.operations();
        if supported.contains(ops) {
            Ok(())
        } else {
            Err(VfsError::unsupported(format!(
                "{what} needs {} but {} allows {}: {path}",
                ops.short(),
                self.root.display(),
                supported.short()
            )))
        }
    }

    /// Resolve a normalized relative path to an absolute path within the root.
    ///
    /// Returns an error if the path escapes the root, either lexically (via
    /// `..`) or through a symlink.
    fn resolve(&self, rel: &str) -> VfsResult<PathBuf> {
        if rel.is_empty() {
            return Ok(self.root.clone());
        }
        for component in path::components(rel) {
            match component {
                ".." => return Err(VfsError::path_escapes_root(rel)),
                "." => return Err(VfsError::invalid_path(rel)),
                _ => {}
            }
        }

        let full = self.root.join(rel);
        if let Ok(canonical) = dunce::canonicalize(&full) {
            if !canonical.starts_with(&self.root) {
                return Err(VfsError::path_escapes_root(format!(
                    "{} is not under {}",
                    canonical.display(),
                    self.root.display()
                )));
            }
        }
        Ok(full)
    }

    fn kind_at(full: &Path) -> EntryType {
        match fs::metadata(full) {
            Ok(meta) if meta.is_dir() => EntryType::Directory,
            Ok(meta) if meta.is_file() => EntryType::File,
            _ => EntryType::Unknown,
        }
    }

    fn kind_of(&self, rel: &str) -> EntryType {
        self.resolve(rel)
            .map(|full| Self::kind_at(&full))
            .unwrap_or_default()
    }
}

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/game/mods`, then the entry `textures/grass.png` is the file
/// `/srv/game/mods/textures/grass.png`.
///
/// Supports every operation by default; narrow that with
/// [`set_allowed_operations`](Self::set_allowed_operations). Cloning yields
/// another handle onto the same configuration.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    state: Arc<LocalState>,
}

impl LocalFileSystem {
    /// Create a filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            state: Arc::new(LocalState {
                root,
                operations: RwLock::new(Operations::all()),
            }),
        }
    }

    /// Create a filesystem that only supports reading.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        let fs = Self::new(root);
        fs.set_allowed_operations(Operations::READ);
        fs
    }

    /// Change the operations this filesystem advertises.
    ///
    /// Takes effect immediately for every handle, including entries that
    /// were already handed out.
    pub fn set_allowed_operations(&self, operations: Operations) {
        *self.state.operations.write() = operations;
    }

    /// Get the root path.
    pub fn root_path(&self) -> &Path {
        &self.state.root
    }
}

impl FileSystem for LocalFileSystem {
    fn root(&self) -> Arc<dyn Entry> {
        Arc::new(LocalEntry {
            state: self.state.clone(),
            path: String::new(),
        })
    }

    fn supported_operations(&self) -> Operations {
        self.state.operations()
    }

    fn name(&self) -> String {
        format!("local:{}", self.state.root.display())
    }
}

/// Handle onto a path in a [`LocalFileSystem`].
#[derive(Debug)]
struct LocalEntry {
    state: Arc<LocalState>,
    path: String,
}

impl LocalEntry {
    fn handle(&self, path: String) -> Arc<dyn Entry> {
        Arc::new(LocalEntry {
            state: self.state.clone(),
            path,
        })
    }

    /// Resolve this entry, requiring it to be a directory.
    fn dir(&self) -> VfsResult<PathBuf> {
        let full = self.state.resolve(&self.path)?;
        if LocalState::kind_at(&full).is_dir() {
            Ok(full)
        } else {
            Err(VfsError::not_a_directory(self.path.clone()))
        }
    }
}

impl Entry for LocalEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        self.state.kind_of(&self.path)
    }

    fn last_write_time(&self) -> SystemTime {
        self.state
            .resolve(&self.path)
            .ok()
            .and_then(|full| fs::metadata(full).ok())
            .and_then(|meta| meta.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    fn child(&self, name: &str) -> VfsResult<Option<Arc<dyn Entry>>> {
        let rel = path::normalize(name, false);
        if rel.is_empty() {
            return Ok(None);
        }

        let mut current = self.path.clone();
        for component in path::components(&rel) {
            let full = self.state.resolve(&current)?;
            match LocalState::kind_at(&full) {
                EntryType::Directory => {}
                EntryType::File => return Err(VfsError::not_a_directory(current)),
                EntryType::Unknown => return Ok(None),
            }
            current = path::join(&current, component);
        }

        let full = self.state.resolve(&current)?;
        if LocalState::kind_at(&full).exists() {
            Ok(Some(self.handle(current)))
        } else {
            Ok(None)
        }
    }

    fn list_children(&self) -> VfsResult<Vec<Arc<dyn Entry>>> {
        self.state.require(Operations::READ, "listing", &self.path)?;
        let full = self.dir()?;

        let mut names = Vec::new();
        for entry in fs::read_dir(&full)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| self.handle(path::join(&self.path, &name)))
            .collect())
    }

    #[tracing::instrument(skip(self), fields(path = %self.path), name = "local.open")]
    fn open(&self, mode: OpenMode) -> VfsResult<Box<dyn ByteStream>> {
        required_for_open(mode, self.state.operations(), &self.path)?;
        if mode.contains(OpenMode::MEMORY_MAPPED) {
            tracing::debug!("memory-mapped access requested, using a regular file stream");
        }

        let full = self.state.resolve(&self.path)?;
        if !LocalState::kind_at(&full).is_file() {
            return Err(VfsError::wrong_type(self.path.clone()));
        }

        let read = mode.contains(OpenMode::READ);
        let write = mode.contains(OpenMode::WRITE);
        let file = fs::OpenOptions::new()
            .read(read)
            .write(write)
            .truncate(write && !read)
            .open(&full)?;
        Ok(Box::new(file))
    }

    fn delete_child(&self, name: &str) -> VfsResult<bool> {
        self.state.require(Operations::DELETE, "deleting", &self.path)?;
        self.dir()?;

        let rel = path::normalize(name, false);
        if rel.is_empty() {
            return Ok(false);
        }
        let target = self.state.resolve(&path::join(&self.path, &rel))?;

        let meta = match fs::symlink_metadata(&target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&target)?;
        } else {
            fs::remove_file(&target)?;
        }
        Ok(true)
    }

    fn create_entry(&self, kind: EntryType, name: &str) -> VfsResult<Arc<dyn Entry>> {
        self.state.require(Operations::CREATE, "creating", &self.path)?;
        if !kind.is_creatable() {
            return Err(VfsError::invalid_type(kind.to_string()));
        }
        self.dir()?;

        let rel = path::normalize(name, false);
        if rel.is_empty() {
            return Err(VfsError::invalid_path("empty entry name"));
        }
        let target = path::join(&self.path, &rel);

        let mut current = self.path.clone();
        for component in path::components(&rel) {
            current = path::join(&current, component);
            let full = self.state.resolve(&current)?;
            let wanted = if current.len() == target.len() {
                kind
            } else {
                EntryType::Directory
            };

            match LocalState::kind_at(&full) {
                EntryType::Unknown if wanted.is_dir() => fs::create_dir(&full)?,
                EntryType::Unknown => {
                    fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&full)?;
                }
                existing if existing == wanted => {}
                _ => return Err(VfsError::type_conflict(current)),
            }
        }

        Ok(self.handle(target))
    }

    fn rename(&self, new_path: &str) -> VfsResult<()> {
        self.state.require(
            Operations::DELETE | Operations::CREATE,
            "renaming",
            &self.path,
        )?;
        if self.path.is_empty() {
            return Err(VfsError::invalid_path("cannot rename the root"));
        }

        let dest = path::normalize(new_path, false);
        if dest.is_empty() || path::is_within(&dest, &self.path) {
            return Err(VfsError::invalid_path(format!(
                "cannot move {} to {dest:?}",
                self.path
            )));
        }

        let from = self.state.resolve(&self.path)?;
        if !LocalState::kind_at(&from).exists() {
            return Err(VfsError::backend(format!("no such entry: {}", self.path)));
        }
        let to = self.state.resolve(&dest)?;
        if LocalState::kind_at(&to).exists() {
            return Err(VfsError::type_conflict(dest));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from, &to)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::conformance;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn setup() -> (LocalFileSystem, TempDir) {
        let dir = TempDir::new().unwrap();
        for (rel, data) in conformance::FIXTURE {
            let full = dir.path().join(rel);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, data).unwrap();
        }
        let backend = LocalFileSystem::new(dir.path());
        (backend, dir)
    }

    #[test]
    fn test_conformance_read_write() {
        let (backend, _dir) = setup();
        conformance::check_read_contract(&backend).unwrap();
        conformance::check_write_contract(&backend).unwrap();
    }

    #[test]
    fn test_conformance_read_only() {
        let (backend, _dir) = setup();
        backend.set_allowed_operations(Operations::READ);
        conformance::check_read_contract(&backend).unwrap();
        conformance::check_read_only_contract(&backend).unwrap();
    }

    #[test]
    fn test_path_escape_blocked() {
        let (backend, _dir) = setup();
        let root = backend.root();

        let err = root.child("../etc/passwd").unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));

        let err = root.create_entry(EntryType::File, "docs/../../x").unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_blocked() {
        let (backend, dir) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "s3cret").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = backend.root().child("link/secret.txt").unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
    }

    #[test]
    fn test_allowed_operations_apply_to_live_entries() {
        let (backend, _dir) = setup();
        let root = backend.root();
        root.create_entry(EntryType::File, "first.txt").unwrap();

        backend.set_allowed_operations(Operations::READ);
        assert_eq!(backend.supported_operations(), Operations::READ);
        let err = root.create_entry(EntryType::File, "second.txt").unwrap_err();
        assert!(matches!(err, VfsError::Unsupported(_)));
    }

    #[test]
    fn test_write_mode_truncates() {
        let (backend, dir) = setup();
        let readme = backend.root().child("readme.txt").unwrap().unwrap();

        {
            let mut stream = readme.open(OpenMode::WRITE).unwrap();
            stream.write_all(b"bye").unwrap();
        }
        assert_eq!(fs::read_to_string(dir.path().join("readme.txt")).unwrap(), "bye");

        {
            let mut stream = readme.open(OpenMode::READ | OpenMode::WRITE).unwrap();
            let mut head = [0u8; 1];
            stream.read_exact(&mut head).unwrap();
            stream.write_all(b"!").unwrap();
        }
        assert_eq!(fs::read_to_string(dir.path().join("readme.txt")).unwrap(), "b!e");
    }

    #[test]
    fn test_memory_mapped_is_a_hint() {
        let (backend, _dir) = setup();
        let readme = backend.root().child("readme.txt").unwrap().unwrap();
        let mut stream = readme
            .open(OpenMode::READ | OpenMode::MEMORY_MAPPED)
            .unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_create_with_missing_parents() {
        let (backend, dir) = setup();
        let entry = backend
            .root()
            .create_entry(EntryType::File, "a/b/c.txt")
            .unwrap();
        assert_eq!(entry.path(), "a/b/c.txt");
        assert!(dir.path().join("a/b").is_dir());
        assert!(dir.path().join("a/b/c.txt").is_file());
    }

    #[test]
    fn test_create_validates_the_created_path() {
        let (backend, _dir) = setup();
        let docs = backend.root().child("docs").unwrap().unwrap();

        let err = docs
            .create_entry(EntryType::Directory, "guide.md")
            .unwrap_err();
        assert!(matches!(err, VfsError::TypeConflict(_)));

        // The parent being a directory says nothing about the target.
        let ok = docs.create_entry(EntryType::File, "guide.md").unwrap();
        assert_eq!(ok.entry_type(), EntryType::File);
    }

    #[test]
    fn test_delete_directory_tree() {
        let (backend, dir) = setup();
        assert!(backend.root().delete_child("docs").unwrap());
        assert!(!dir.path().join("docs").exists());
        assert!(!backend.root().delete_child("docs").unwrap());
    }
}
