//! Contract checks for filesystem implementations.
//!
//! Seed a filesystem with [`FIXTURE`], then run the checks that match its
//! capabilities. Every in-tree backend and the union run these against
//! themselves; out-of-tree backends can do the same.
//!
//! [`InstrumentedFileSystem`] wraps any filesystem to count listings and to
//! inject open failures, which is how fallback and caching behaviour is
//! observed from the outside.

use anyhow::{Context, Result, bail, ensure};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use kasane_types::path;
use kasane_types::{EntryType, OpenMode, Operations, VfsError, VfsResult};

use super::ops::{ByteStream, Entry, FileSystem};

/// Files every checked filesystem must contain, as `(path, contents)`.
pub const FIXTURE: &[(&str, &str)] = &[
    ("readme.txt", "hello"),
    ("docs/guide.md", "# guide"),
    ("docs/nested/deep.txt", "deep"),
];

fn lookup(fs: &dyn FileSystem, rel: &str) -> Result<Arc<dyn Entry>> {
    fs.root()
        .child(rel)
        .with_context(|| format!("resolving {rel}"))?
        .with_context(|| format!("{rel} is missing"))
}

fn child_names(entry: &dyn Entry) -> Result<Vec<String>> {
    Ok(entry
        .list_children()
        .with_context(|| format!("listing {:?}", entry.path()))?
        .iter()
        .map(|c| path::file_name(c.path()).to_string())
        .collect())
}

fn expect_err<T>(result: VfsResult<T>, what: &str, check: fn(&VfsError) -> bool) -> Result<()> {
    match result {
        Ok(_) => bail!("{what}: expected an error, got success"),
        Err(e) if check(&e) => Ok(()),
        Err(e) => bail!("{what}: unexpected error {e:?}"),
    }
}

/// Navigation, listing and reading.
pub fn check_read_contract(fs: &dyn FileSystem) -> Result<()> {
    ensure!(fs.supports(Operations::READ), "{} cannot read", fs.name());

    let root = fs.root();
    ensure!(root.is_root(), "root path is {:?}", root.path());
    ensure!(root.entry_type() == EntryType::Directory, "root is not a directory");
    ensure!(root.child("")?.is_none(), "empty name resolved to an entry");
    ensure!(root.child("missing")?.is_none(), "missing name resolved");
    ensure!(
        root.child("docs/missing/deeper")?.is_none(),
        "missing intermediate resolved"
    );

    let names = child_names(root.as_ref())?;
    for expected in ["readme.txt", "docs"] {
        ensure!(names.iter().any(|n| n == expected), "root listing {names:?} lacks {expected}");
    }
    ensure!(
        root.num_children()? == names.len(),
        "num_children disagrees with list_children"
    );

    let readme = lookup(fs, "readme.txt")?;
    ensure!(readme.path() == "readme.txt", "readme path is {:?}", readme.path());
    ensure!(readme.entry_type() == EntryType::File, "readme is not a file");
    ensure!(readme.read_to_end()? == b"hello", "readme contents differ");
    expect_err(readme.child("x"), "child of a file", |e| {
        matches!(e, VfsError::NotADirectory(_))
    })?;
    expect_err(readme.list_children(), "listing a file", |e| {
        matches!(e, VfsError::NotADirectory(_))
    })?;
    expect_err(readme.open(OpenMode::empty()), "empty open mode", |e| {
        matches!(e, VfsError::Unsupported(_))
    })?;
    expect_err(root.child("readme.txt/x"), "walking through a file", |e| {
        matches!(e, VfsError::NotADirectory(_))
    })?;

    let guide = lookup(fs, "/docs//guide.md/")?;
    ensure!(guide.path() == "docs/guide.md", "guide path is {:?}", guide.path());

    let docs = lookup(fs, "docs")?;
    ensure!(docs.entry_type() == EntryType::Directory, "docs is not a directory");
    let mut docs_names = child_names(docs.as_ref())?;
    docs_names.sort();
    ensure!(docs_names == ["guide.md", "nested"], "docs listing is {docs_names:?}");
    expect_err(docs.open(OpenMode::READ), "opening a directory", |e| {
        matches!(e, VfsError::WrongType(_))
    })?;

    let deep = docs
        .child("nested/deep.txt")?
        .context("docs/nested/deep.txt is missing")?;
    ensure!(deep.path() == "docs/nested/deep.txt", "deep path is {:?}", deep.path());
    ensure!(deep.read_to_end()? == b"deep", "deep contents differ");

    Ok(())
}

/// Creating, writing, renaming and deleting. Needs every operation.
pub fn check_write_contract(fs: &dyn FileSystem) -> Result<()> {
    ensure!(
        fs.supports(Operations::all()),
        "{} supports only {}",
        fs.name(),
        fs.supported_operations().short()
    );
    let root = fs.root();

    let created = root.create_entry(EntryType::File, "scratch/new.txt")?;
    ensure!(created.path() == "scratch/new.txt", "created path is {:?}", created.path());
    ensure!(created.entry_type() == EntryType::File, "created entry is not a file");
    created.write_all(b"fresh")?;
    ensure!(
        lookup(fs, "scratch/new.txt")?.read_to_end()? == b"fresh",
        "written bytes not visible"
    );
    ensure!(
        lookup(fs, "scratch")?.entry_type() == EntryType::Directory,
        "intermediate directory missing"
    );

    // Create-or-validate.
    root.create_entry(EntryType::File, "scratch/new.txt")?;
    expect_err(
        root.create_entry(EntryType::Directory, "scratch/new.txt"),
        "directory over a file",
        |e| matches!(e, VfsError::TypeConflict(_)),
    )?;
    expect_err(
        root.create_entry(EntryType::Unknown, "scratch/what"),
        "creating Unknown",
        |e| matches!(e, VfsError::InvalidType(_)),
    )?;
    expect_err(
        created.create_entry(EntryType::File, "inside"),
        "creating under a file",
        |e| matches!(e, VfsError::NotADirectory(_)),
    )?;

    ensure!(
        created.last_write_time() > SystemTime::UNIX_EPOCH,
        "created file has no modification time"
    );

    lookup(fs, "scratch/new.txt")?.rename("scratch/renamed.txt")?;
    ensure!(
        root.child("scratch/new.txt")?.is_none(),
        "old name still resolves after rename"
    );
    ensure!(
        lookup(fs, "scratch/renamed.txt")?.read_to_end()? == b"fresh",
        "renamed file lost its contents"
    );

    ensure!(root.delete_child("scratch")?, "deleting scratch reported nothing removed");
    ensure!(root.child("scratch")?.is_none(), "scratch survived deletion");
    ensure!(!root.delete_child("scratch")?, "second delete reported a removal");
    ensure!(!root.delete_child("missing")?, "deleting a missing name reported a removal");

    Ok(())
}

/// Mutations are refused with `Unsupported`. Needs `READ` only.
pub fn check_read_only_contract(fs: &dyn FileSystem) -> Result<()> {
    ensure!(
        fs.supported_operations() == Operations::READ,
        "{} supports {}",
        fs.name(),
        fs.supported_operations().short()
    );
    let root = fs.root();
    let readme = lookup(fs, "readme.txt")?;

    expect_err(readme.open(OpenMode::WRITE), "write open", |e| {
        matches!(e, VfsError::Unsupported(_))
    })?;
    expect_err(root.create_entry(EntryType::File, "new.txt"), "create", |e| {
        matches!(e, VfsError::Unsupported(_))
    })?;
    expect_err(root.delete_child("readme.txt"), "delete", |e| {
        matches!(e, VfsError::Unsupported(_))
    })?;
    expect_err(readme.rename("moved.txt"), "rename", |e| {
        matches!(e, VfsError::Unsupported(_))
    })?;
    ensure!(root.child("readme.txt")?.is_some(), "readme vanished");

    Ok(())
}

// ============================================================================
// Instrumentation
// ============================================================================

#[derive(Debug, Default)]
struct ProbeState {
    list_calls: AtomicUsize,
    open_calls: AtomicUsize,
    failing_opens: Mutex<HashSet<String>>,
}

/// Shared view onto an [`InstrumentedFileSystem`]'s counters and faults.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    state: Arc<ProbeState>,
}

impl Probe {
    /// Number of `list_children`/`num_children` calls that reached the backend.
    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `open` calls that reached the backend.
    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    /// Make every `open` of `path` fail with a backend error.
    pub fn fail_open(&self, path: &str) {
        self.state
            .failing_opens
            .lock()
            .insert(path::normalize(path, false));
    }

    /// Zero the counters. Injected faults stay.
    pub fn reset(&self) {
        self.state.list_calls.store(0, Ordering::SeqCst);
        self.state.open_calls.store(0, Ordering::SeqCst);
    }
}

/// Wraps a filesystem, counting calls and injecting faults.
pub struct InstrumentedFileSystem {
    inner: Arc<dyn FileSystem>,
    probe: Probe,
}

impl InstrumentedFileSystem {
    pub fn new(inner: impl FileSystem + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            probe: Probe::default(),
        }
    }

    /// Handle for inspecting this filesystem after it has been moved into a union.
    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

impl FileSystem for InstrumentedFileSystem {
    fn root(&self) -> Arc<dyn Entry> {
        InstrumentedEntry::wrap(self.inner.root(), &self.probe)
    }

    fn supported_operations(&self) -> Operations {
        self.inner.supported_operations()
    }

    fn name(&self) -> String {
        format!("instrumented({})", self.inner.name())
    }
}

struct InstrumentedEntry {
    inner: Arc<dyn Entry>,
    probe: Probe,
}

impl InstrumentedEntry {
    fn wrap(inner: Arc<dyn Entry>, probe: &Probe) -> Arc<dyn Entry> {
        Arc::new(Self {
            inner,
            probe: probe.clone(),
        })
    }
}

impl Entry for InstrumentedEntry {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn entry_type(&self) -> EntryType {
        self.inner.entry_type()
    }

    fn last_write_time(&self) -> SystemTime {
        self.inner.last_write_time()
    }

    fn child(&self, name: &str) -> VfsResult<Option<Arc<dyn Entry>>> {
        Ok(self
            .inner
            .child(name)?
            .map(|e| InstrumentedEntry::wrap(e, &self.probe)))
    }

    fn list_children(&self) -> VfsResult<Vec<Arc<dyn Entry>>> {
        self.probe.state.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .list_children()?
            .into_iter()
            .map(|e| InstrumentedEntry::wrap(e, &self.probe))
            .collect())
    }

    fn num_children(&self) -> VfsResult<usize> {
        self.probe.state.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.num_children()
    }

    fn open(&self, mode: OpenMode) -> VfsResult<Box<dyn ByteStream>> {
        self.probe.state.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.state.failing_opens.lock().contains(self.inner.path()) {
            return Err(VfsError::backend(format!(
                "injected open failure: {}",
                self.inner.path()
            )));
        }
        self.inner.open(mode)
    }

    fn delete_child(&self, name: &str) -> VfsResult<bool> {
        self.inner.delete_child(name)
    }

    fn create_entry(&self, kind: EntryType, name: &str) -> VfsResult<Arc<dyn Entry>> {
        Ok(InstrumentedEntry::wrap(
            self.inner.create_entry(kind, name)?,
            &self.probe,
        ))
    }

    fn rename(&self, new_path: &str) -> VfsResult<()> {
        self.inner.rename(new_path)
    }
}
