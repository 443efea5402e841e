//! In-memory filesystem backend.
//!
//! Used for testing and for assets compiled into a binary. All data is
//! ephemeral.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use kasane_types::path;
use kasane_types::{EntryType, OpenMode, Operations, VfsError, VfsResult};

use crate::vfs::ops::{ByteStream, Entry, FileSystem, required_for_open};
use crate::vfs::stream::BufferStream;

/// A node in the memory tree.
#[derive(Debug, Clone)]
enum Node {
    Directory { modified: SystemTime },
    File { data: Vec<u8>, modified: SystemTime },
}

impl Node {
    fn kind(&self) -> EntryType {
        match self {
            Node::Directory { .. } => EntryType::Directory,
            Node::File { .. } => EntryType::File,
        }
    }

    fn modified(&self) -> SystemTime {
        match self {
            Node::Directory { modified } | Node::File { modified, .. } => *modified,
        }
    }

    fn empty(kind: EntryType) -> Self {
        let modified = SystemTime::now();
        match kind {
            EntryType::File => Node::File {
                data: Vec::new(),
                modified,
            },
            _ => Node::Directory { modified },
        }
    }
}

/// State shared between the filesystem and every entry handle.
#[derive(Debug)]
struct MemoryState {
    name: String,
    operations: Operations,
    /// Keyed by normalized path. The root is `""` and always present.
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl MemoryState {
    fn kind_of(&self, path: &str) -> EntryType {
        self.nodes
            .read()
            .get(path)
            .map(Node::kind)
            .unwrap_or_default()
    }

    fn require(&self, ops: Operations, what: &str, path: &str) -> VfsResult<()> {
        if self.operations.contains(ops) {
            Ok(())
        } else {
            Err(VfsError::unsupported(format!(
                "{} does not support {what}: {path}",
                self.name
            )))
        }
    }

    /// Insert `kind` at `target`, creating missing parents.
    ///
    /// An existing node of the same type is accepted as-is.
    fn insert(&self, target: &str, kind: EntryType) -> VfsResult<()> {
        let mut nodes = self.nodes.write();

        let mut current = String::new();
        for component in path::components(target) {
            current = path::join(&current, component);
            let wanted = if current.len() == target.len() {
                kind
            } else {
                EntryType::Directory
            };
            match nodes.get(&current) {
                Some(node) if node.kind() == wanted => {}
                Some(_) => return Err(VfsError::type_conflict(current)),
                None => {
                    nodes.insert(current.clone(), Node::empty(wanted));
                }
            }
        }
        Ok(())
    }
}

/// In-memory filesystem.
///
/// Thread-safe via an internal `RwLock`. Cloning yields another handle onto
/// the same tree.
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    state: Arc<MemoryState>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    /// Create an empty tree supporting every operation.
    pub fn new() -> Self {
        Self::with_operations(Operations::all())
    }

    /// Create an empty tree supporting only `operations`.
    pub fn with_operations(operations: Operations) -> Self {
        Self::build("memory".to_string(), operations)
    }

    /// Create an empty, named tree supporting only `operations`.
    pub fn named(name: impl Into<String>, operations: Operations) -> Self {
        Self::build(name.into(), operations)
    }

    fn build(name: String, operations: Operations) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            String::new(),
            Node::Directory {
                modified: SystemTime::UNIX_EPOCH,
            },
        );
        Self {
            state: Arc::new(MemoryState {
                name,
                operations,
                nodes: RwLock::new(nodes),
            }),
        }
    }

    // ========================================================================
    // Seeding (bypasses capability checks)
    // ========================================================================

    /// Add a directory (and any missing parents).
    pub fn add_dir(&self, path: &str) -> VfsResult<&Self> {
        let target = path::normalize(path, false);
        self.state.insert(&target, EntryType::Directory)?;
        Ok(self)
    }

    /// Add a file with `data` (and any missing parent directories).
    ///
    /// An existing file at `path` is overwritten.
    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) -> VfsResult<&Self> {
        self.add_file_at(path, data, SystemTime::now())
    }

    /// Add a file with an explicit modification time.
    pub fn add_file_at(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        modified: SystemTime,
    ) -> VfsResult<&Self> {
        let target = path::normalize(path, false);
        if target.is_empty() {
            return Err(VfsError::invalid_path("cannot replace the root with a file"));
        }
        self.state.insert(&target, EntryType::File)?;
        self.state.nodes.write().insert(
            target,
            Node::File {
                data: data.into(),
                modified,
            },
        );
        Ok(self)
    }

    /// Number of nodes, root excluded.
    pub fn len(&self) -> usize {
        self.state.nodes.read().len() - 1
    }

    /// Returns true if the tree holds nothing but the root.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, path: String) -> Arc<dyn Entry> {
        Arc::new(MemoryEntry {
            state: self.state.clone(),
            path,
        })
    }
}

impl FileSystem for MemoryFileSystem {
    fn root(&self) -> Arc<dyn Entry> {
        self.entry(String::new())
    }

    fn supported_operations(&self) -> Operations {
        self.state.operations
    }

    fn name(&self) -> String {
        self.state.name.clone()
    }
}

/// Handle onto a path in a [`MemoryFileSystem`].
#[derive(Debug)]
struct MemoryEntry {
    state: Arc<MemoryState>,
    path: String,
}

impl MemoryEntry {
    fn handle(&self, path: String) -> Arc<dyn Entry> {
        Arc::new(MemoryEntry {
            state: self.state.clone(),
            path,
        })
    }

    fn require_dir(&self) -> VfsResult<()> {
        if self.state.kind_of(&self.path).is_dir() {
            Ok(())
        } else {
            Err(VfsError::not_a_directory(self.path.clone()))
        }
    }
}

impl Entry for MemoryEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        self.state.kind_of(&self.path)
    }

    fn last_write_time(&self) -> SystemTime {
        self.state
            .nodes
            .read()
            .get(&self.path)
            .map(Node::modified)
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    fn child(&self, name: &str) -> VfsResult<Option<Arc<dyn Entry>>> {
        let rel = path::normalize(name, false);
        if rel.is_empty() {
            return Ok(None);
        }

        let nodes = self.state.nodes.read();
        let mut current = self.path.clone();
        for component in path::components(&rel) {
            match nodes.get(&current) {
                Some(Node::Directory { .. }) => {}
                Some(Node::File { .. }) => return Err(VfsError::not_a_directory(current)),
                None => return Ok(None),
            }
            current = path::join(&current, component);
        }

        if nodes.contains_key(&current) {
            Ok(Some(self.handle(current)))
        } else {
            Ok(None)
        }
    }

    fn list_children(&self) -> VfsResult<Vec<Arc<dyn Entry>>> {
        self.state.require(Operations::READ, "listing", &self.path)?;
        self.require_dir()?;

        let nodes = self.state.nodes.read();
        // BTreeMap iteration keeps listings sorted.
        Ok(nodes
            .keys()
            .filter(|key| !key.is_empty() && path::parent(key).unwrap_or("") == self.path)
            .map(|key| self.handle(key.clone()))
            .collect())
    }

    fn open(&self, mode: OpenMode) -> VfsResult<Box<dyn ByteStream>> {
        required_for_open(mode, self.state.operations, &self.path)?;
        if mode.contains(OpenMode::MEMORY_MAPPED) {
            return Err(VfsError::unsupported(format!(
                "memory-mapped access is not available: {}",
                self.path
            )));
        }

        let existing = match self.state.nodes.read().get(&self.path) {
            Some(Node::File { data, .. }) => data.clone(),
            _ => return Err(VfsError::wrong_type(self.path.clone())),
        };

        if !mode.contains(OpenMode::WRITE) {
            return Ok(Box::new(BufferStream::reader(existing)));
        }

        // Write without read truncates at open, like `File::create`.
        let initial = if mode.contains(OpenMode::READ) {
            existing
        } else {
            let mut nodes = self.state.nodes.write();
            if let Some(Node::File { data, modified }) = nodes.get_mut(&self.path) {
                data.clear();
                *modified = SystemTime::now();
            }
            Vec::new()
        };
        let state = self.state.clone();
        let path = self.path.clone();
        Ok(Box::new(BufferStream::writer(initial, move |bytes| {
            let mut nodes = state.nodes.write();
            match nodes.get_mut(&path) {
                Some(Node::File { data, modified }) => {
                    *data = bytes.to_vec();
                    *modified = SystemTime::now();
                    Ok(())
                }
                _ => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("file vanished before commit: {path}"),
                )),
            }
        })))
    }

    fn delete_child(&self, name: &str) -> VfsResult<bool> {
        self.state.require(Operations::DELETE, "deleting", &self.path)?;
        self.require_dir()?;

        let rel = path::normalize(name, false);
        if rel.is_empty() {
            return Ok(false);
        }
        let target = path::join(&self.path, &rel);

        let mut nodes = self.state.nodes.write();
        if !nodes.contains_key(&target) {
            return Ok(false);
        }
        nodes.retain(|key, _| !path::is_within(key, &target));
        Ok(true)
    }

    fn create_entry(&self, kind: EntryType, name: &str) -> VfsResult<Arc<dyn Entry>> {
        self.state.require(Operations::CREATE, "creating", &self.path)?;
        if !kind.is_creatable() {
            return Err(VfsError::invalid_type(kind.to_string()));
        }
        self.require_dir()?;

        let rel = path::normalize(name, false);
        if rel.is_empty() {
            return Err(VfsError::invalid_path("empty entry name"));
        }
        let target = path::join(&self.path, &rel);
        self.state.insert(&target, kind)?;
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
        if !self.state.kind_of(&self.path).exists() {
            return Err(VfsError::backend(format!("no such entry: {}", self.path)));
        }
        if self.state.kind_of(&dest).exists() {
            return Err(VfsError::type_conflict(dest));
        }
        if let Some(parent) = path::parent(&dest) {
            self.state.insert(parent, EntryType::Directory)?;
        }

        let mut nodes = self.state.nodes.write();
        let moved: Vec<String> = nodes
            .keys()
            .filter(|key| path::is_within(key, &self.path))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = nodes.remove(&key) {
                let suffix = &key[self.path.len()..];
                nodes.insert(format!("{dest}{suffix}"), node);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::conformance;
    use std::io::{Read, Write};
    use std::time::Duration;

    fn seeded(operations: Operations) -> MemoryFileSystem {
        let fs = MemoryFileSystem::with_operations(operations);
        for (path, data) in conformance::FIXTURE {
            fs.add_file(path, *data).unwrap();
        }
        fs
    }

    #[test]
    fn test_conformance_read_write() {
        let fs = seeded(Operations::all());
        conformance::check_read_contract(&fs).unwrap();
        conformance::check_write_contract(&fs).unwrap();
    }

    #[test]
    fn test_conformance_read_only() {
        let fs = seeded(Operations::READ);
        conformance::check_read_contract(&fs).unwrap();
        conformance::check_read_only_contract(&fs).unwrap();
    }

    #[test]
    fn test_add_file_and_read() {
        let fs = MemoryFileSystem::with_operations(Operations::READ);
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1234);
        fs.add_file_at("Test", "TestTestTest", stamp).unwrap();

        let root = fs.root();
        assert_eq!(root.num_children().unwrap(), 1);

        let entry = root.child("Test").unwrap().unwrap();
        assert_eq!(entry.path(), "Test");
        assert_eq!(entry.entry_type(), EntryType::File);
        assert_eq!(entry.last_write_time(), stamp);
        assert_eq!(entry.read_to_end().unwrap(), b"TestTestTest");
    }

    #[test]
    fn test_refuses_memory_mapped() {
        let fs = seeded(Operations::all());
        let entry = fs.root().child("readme.txt").unwrap().unwrap();
        let err = entry
            .open(OpenMode::READ | OpenMode::MEMORY_MAPPED)
            .err().unwrap();
        assert!(matches!(err, VfsError::Unsupported(_)));
    }

    #[test]
    fn test_write_truncates_read_write_preserves() {
        let fs = MemoryFileSystem::new();
        fs.add_file("a.txt", "hello world").unwrap();
        let entry = fs.root().child("a.txt").unwrap().unwrap();

        {
            let mut stream = entry.open(OpenMode::READ | OpenMode::WRITE).unwrap();
            stream.write_all(b"J").unwrap();
        }
        assert_eq!(entry.read_to_end().unwrap(), b"Jello world");

        {
            let mut stream = entry.open(OpenMode::WRITE).unwrap();
            stream.write_all(b"bye").unwrap();
        }
        let mut out = String::new();
        entry
            .open(OpenMode::READ)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "bye");
    }

    #[test]
    fn test_write_open_truncates_without_writing() {
        let fs = MemoryFileSystem::new();
        fs.add_file("a.txt", "old contents").unwrap();
        let entry = fs.root().child("a.txt").unwrap().unwrap();

        drop(entry.open(OpenMode::WRITE).unwrap());
        assert!(entry.read_to_end().unwrap().is_empty());
    }

    #[test]
    fn test_create_type_conflict() {
        let fs = MemoryFileSystem::new();
        fs.add_file("docs", "not a dir").unwrap();
        let root = fs.root();

        let err = root.create_entry(EntryType::Directory, "docs").unwrap_err();
        assert!(matches!(err, VfsError::TypeConflict(_)));

        let err = root
            .create_entry(EntryType::File, "docs/inner.txt")
            .unwrap_err();
        assert!(matches!(err, VfsError::TypeConflict(_)));

        // Same type validates.
        let again = root.create_entry(EntryType::File, "docs").unwrap();
        assert_eq!(again.entry_type(), EntryType::File);
    }

    #[test]
    fn test_rename_moves_subtree() {
        let fs = seeded(Operations::all());
        let docs = fs.root().child("docs").unwrap().unwrap();
        docs.rename("manual").unwrap();

        let root = fs.root();
        assert!(root.child("docs").unwrap().is_none());
        let deep = root.child("manual/nested/deep.txt").unwrap().unwrap();
        assert_eq!(deep.read_to_end().unwrap(), b"deep");
        assert_eq!(docs.entry_type(), EntryType::Unknown);
    }

    #[test]
    fn test_rename_into_itself_rejected() {
        let fs = seeded(Operations::all());
        let docs = fs.root().child("docs").unwrap().unwrap();
        assert!(matches!(
            docs.rename("docs/inside").unwrap_err(),
            VfsError::InvalidPath(_)
        ));
    }

    #[test]
    fn test_stream_commit_after_delete_fails_quietly() {
        let fs = MemoryFileSystem::new();
        fs.add_file("gone.txt", "x").unwrap();
        let entry = fs.root().child("gone.txt").unwrap().unwrap();
        let mut stream = entry.open(OpenMode::WRITE).unwrap();
        stream.write_all(b"late").unwrap();

        assert!(fs.root().delete_child("gone.txt").unwrap());
        assert!(stream.flush().is_err());
        assert!(fs.root().child("gone.txt").unwrap().is_none());
    }

    #[test]
    fn test_len() {
        let fs = MemoryFileSystem::new();
        assert!(fs.is_empty());
        fs.add_file("a/b/c.txt", "").unwrap();
        assert_eq!(fs.len(), 3);
    }
}
