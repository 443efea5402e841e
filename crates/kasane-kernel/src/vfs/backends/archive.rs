//! Read-only archive backend.
//!
//! An archive is a flat list of records. Decoding a concrete container
//! format is the job of an [`ArchiveReader`]; this module turns the flat
//! list into a tree, synthesizes directories that are only implied by file
//! paths, and verifies extracted bytes against their recorded CRC-32.

use indexmap::IndexMap;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use kasane_types::path;
use kasane_types::{EntryType, OpenMode, Operations, VfsError, VfsResult};

use crate::vfs::ops::{ByteStream, Entry, FileSystem, required_for_open};
use crate::vfs::stream::BufferStream;

// ============================================================================
// CRC-32
// ============================================================================

static CRC_TABLE: OnceLock<[u32; 256]> = OnceLock::new();

fn crc_table() -> &'static [u32; 256] {
    CRC_TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (n, slot) in table.iter_mut().enumerate() {
            let mut c = n as u32;
            for _ in 0..8 {
                c = if c & 1 != 0 {
                    0xEDB8_8320 ^ (c >> 1)
                } else {
                    c >> 1
                };
            }
            *slot = c;
        }
        table
    })
}

/// CRC-32 (IEEE) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let table = crc_table();
    !data.iter().fold(!0u32, |crc, &byte| {
        table[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
    })
}

// ============================================================================
// Readers
// ============================================================================

/// One record in an archive's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    /// Path inside the archive. Normalized on load.
    pub path: String,
    pub kind: EntryType,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Checksum of the uncompressed bytes, if the archive stores one.
    pub crc32: Option<u32>,
    pub modified: Option<SystemTime>,
}

/// Decodes a concrete archive format.
pub trait ArchiveReader: Send + Sync {
    /// The archive's index, in archive order.
    fn records(&self) -> VfsResult<Vec<ArchiveRecord>>;

    /// Uncompressed bytes of the record at `index`.
    fn extract(&self, index: usize) -> VfsResult<Vec<u8>>;
}

/// An archive held in memory with its records stored uncompressed.
///
/// Useful for embedded assets and for tests.
#[derive(Debug, Clone, Default)]
pub struct StoredArchive {
    records: Vec<ArchiveRecord>,
    payloads: Vec<Vec<u8>>,
}

impl StoredArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directory record.
    pub fn with_dir(self, path: impl Into<String>) -> Self {
        self.with_record(
            ArchiveRecord {
                path: path.into(),
                kind: EntryType::Directory,
                size: 0,
                crc32: None,
                modified: None,
            },
            Vec::new(),
        )
    }

    /// Append a file record, checksumming `data`.
    pub fn with_file(self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        self.with_record(
            ArchiveRecord {
                path: path.into(),
                kind: EntryType::File,
                size: data.len() as u64,
                crc32: Some(crc32(&data)),
                modified: None,
            },
            data,
        )
    }

    /// Append a record verbatim. Nothing is checked.
    pub fn with_record(mut self, record: ArchiveRecord, data: Vec<u8>) -> Self {
        self.records.push(record);
        self.payloads.push(data);
        self
    }
}

impl ArchiveReader for StoredArchive {
    fn records(&self) -> VfsResult<Vec<ArchiveRecord>> {
        Ok(self.records.clone())
    }

    fn extract(&self, index: usize) -> VfsResult<Vec<u8>> {
        self.payloads
            .get(index)
            .cloned()
            .ok_or_else(|| VfsError::backend(format!("no record at index {index}")))
    }
}

// ============================================================================
// Filesystem
// ============================================================================

#[derive(Debug, Clone)]
struct ArchiveNode {
    kind: EntryType,
    /// Index into the reader's records; `None` for implied directories.
    record: Option<usize>,
    crc32: Option<u32>,
    modified: SystemTime,
}

struct ArchiveState {
    name: String,
    reader: Box<dyn ArchiveReader>,
    nodes: IndexMap<String, ArchiveNode>,
}

impl ArchiveState {
    fn kind_of(&self, path: &str) -> EntryType {
        if path.is_empty() {
            return EntryType::Directory;
        }
        self.nodes.get(path).map(|n| n.kind).unwrap_or_default()
    }

    fn read_only(&self, path: &str) -> VfsError {
        VfsError::unsupported(format!("{} is read-only: {path}", self.name))
    }
}

/// Read-only filesystem over an archive.
#[derive(Clone)]
pub struct ArchiveFileSystem {
    state: Arc<ArchiveState>,
}

impl std::fmt::Debug for ArchiveFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFileSystem")
            .field("name", &self.state.name)
            .field("entries", &self.state.nodes.len())
            .finish()
    }
}

impl ArchiveFileSystem {
    /// Index the archive behind `reader`.
    pub fn new(reader: impl ArchiveReader + 'static) -> VfsResult<Self> {
        Self::named("archive", reader)
    }

    /// Index the archive behind `reader` under a display name.
    pub fn named(name: impl Into<String>, reader: impl ArchiveReader + 'static) -> VfsResult<Self> {
        let name = name.into();
        let mut nodes: IndexMap<String, ArchiveNode> = IndexMap::new();

        for (index, record) in reader.records()?.into_iter().enumerate() {
            let key = path::normalize(&record.path, false);
            if key.is_empty() || !record.kind.is_creatable() {
                tracing::warn!(
                    archive = %name,
                    index,
                    path = %record.path,
                    "skipping unusable archive record"
                );
                continue;
            }

            let mut current = String::new();
            if let Some(parent) = path::parent(&key) {
                for component in path::components(parent) {
                    current = path::join(&current, component);
                    match nodes.get(&current) {
                        Some(node) if node.kind.is_dir() => {}
                        Some(_) => {
                            return Err(VfsError::backend(format!(
                                "corrupt archive {name}: {current} is both a file and a directory"
                            )));
                        }
                        None => {
                            nodes.insert(
                                current.clone(),
                                ArchiveNode {
                                    kind: EntryType::Directory,
                                    record: None,
                                    crc32: None,
                                    modified: SystemTime::UNIX_EPOCH,
                                },
                            );
                        }
                    }
                }
            }

            let node = ArchiveNode {
                kind: record.kind,
                record: Some(index),
                crc32: record.crc32.filter(|_| record.size > 0),
                modified: record.modified.unwrap_or(SystemTime::UNIX_EPOCH),
            };
            match nodes.get_mut(&key) {
                None => {
                    nodes.insert(key, node);
                }
                // An explicit record for a directory we synthesized earlier.
                Some(existing) if existing.kind.is_dir() && node.kind.is_dir() => {
                    *existing = node;
                }
                Some(_) => {
                    return Err(VfsError::backend(format!(
                        "corrupt archive {name}: duplicate entry {key}"
                    )));
                }
            }
        }

        tracing::debug!(archive = %name, entries = nodes.len(), "indexed archive");
        Ok(Self {
            state: Arc::new(ArchiveState {
                name,
                reader: Box::new(reader),
                nodes,
            }),
        })
    }
}

impl FileSystem for ArchiveFileSystem {
    fn root(&self) -> Arc<dyn Entry> {
        Arc::new(ArchiveEntry {
            state: self.state.clone(),
            path: String::new(),
        })
    }

    fn supported_operations(&self) -> Operations {
        Operations::READ
    }

    fn name(&self) -> String {
        self.state.name.clone()
    }
}

struct ArchiveEntry {
    state: Arc<ArchiveState>,
    path: String,
}

impl ArchiveEntry {
    fn handle(&self, path: String) -> Arc<dyn Entry> {
        Arc::new(ArchiveEntry {
            state: self.state.clone(),
            path,
        })
    }
}

impl Entry for ArchiveEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        self.state.kind_of(&self.path)
    }

    fn last_write_time(&self) -> SystemTime {
        self.state
            .nodes
            .get(&self.path)
            .map(|n| n.modified)
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    fn child(&self, name: &str) -> VfsResult<Option<Arc<dyn Entry>>> {
        let rel = path::normalize(name, false);
        if rel.is_empty() {
            return Ok(None);
        }

        let mut current = self.path.clone();
        for component in path::components(&rel) {
            match self.state.kind_of(&current) {
                EntryType::Directory => {}
                EntryType::File => return Err(VfsError::not_a_directory(current)),
                EntryType::Unknown => return Ok(None),
            }
            current = path::join(&current, component);
        }

        if self.state.kind_of(&current).exists() {
            Ok(Some(self.handle(current)))
        } else {
            Ok(None)
        }
    }

    fn list_children(&self) -> VfsResult<Vec<Arc<dyn Entry>>> {
        if !self.state.kind_of(&self.path).is_dir() {
            return Err(VfsError::not_a_directory(self.path.clone()));
        }
        Ok(self
            .state
            .nodes
            .keys()
            .filter(|key| path::parent(key).unwrap_or("") == self.path)
            .map(|key| self.handle(key.clone()))
            .collect())
    }

    fn open(&self, mode: OpenMode) -> VfsResult<Box<dyn ByteStream>> {
        required_for_open(mode, Operations::READ, &self.path)?;

        let node = match self.state.nodes.get(&self.path) {
            Some(node) if node.kind.is_file() => node,
            _ => return Err(VfsError::wrong_type(self.path.clone())),
        };
        if mode.contains(OpenMode::MEMORY_MAPPED) {
            return Err(VfsError::backend(format!(
                "archive entries can't be memory mapped: {}",
                self.path
            )));
        }

        let index = node
            .record
            .ok_or_else(|| VfsError::backend(format!("no record for {}", self.path)))?;
        let data = self.state.reader.extract(index)?;

        if let Some(expected) = node.crc32 {
            let actual = crc32(&data);
            if actual != expected {
                tracing::warn!(
                    archive = %self.state.name,
                    path = %self.path,
                    expected,
                    actual,
                    "checksum mismatch"
                );
                return Err(VfsError::backend(format!(
                    "CRC error (archive corrupted?): {}",
                    self.path
                )));
            }
        }

        Ok(Box::new(BufferStream::reader(data)))
    }

    fn delete_child(&self, _name: &str) -> VfsResult<bool> {
        Err(self.state.read_only(&self.path))
    }

    fn create_entry(&self, _kind: EntryType, _name: &str) -> VfsResult<Arc<dyn Entry>> {
        Err(self.state.read_only(&self.path))
    }

    fn rename(&self, _new_path: &str) -> VfsResult<()> {
        Err(self.state.read_only(&self.path))
    }
}
