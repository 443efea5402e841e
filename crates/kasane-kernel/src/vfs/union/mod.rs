//! Union filesystem: an ordered stack of backends seen as one tree.
//!
//! Resolution is by priority. The first backend (in insertion order) that
//! has a node at a path supplies that path's entry and shadows the same
//! name in every later backend. Merged directory listings are cached per
//! directory and rebuilt when marked dirty.
//!
//! | Operation                   | Policy across backends                    |
//! |-----------------------------|-------------------------------------------|
//! | `list_children` / `child`   | first backend with the name wins          |
//! | `open`                      | primary first, then any capable backend   |
//! | `delete_child`              | every capable backend holding the name    |
//! | `create_entry`              | first capable backend that accepts it     |
//! | `rename` / metadata         | primary backend only                      |

mod entry;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};

use kasane_types::path;
use kasane_types::{Operations, VfsResult};

use super::ops::{Entry, FileSystem};

pub use entry::UnionEntry;

/// When the union drops cached listings after its own mutations.
///
/// `rename` always invalidates the renamed entry's parent. The policy
/// governs `create_entry` and `delete_child`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InvalidationPolicy {
    /// Listings stay as cached until `invalidate`, `invalidate_all` or
    /// `populate` refreshes them.
    #[default]
    Lazy,
    /// The directory a create or delete was invoked on is marked dirty after
    /// the call succeeds.
    Eager,
}

#[derive(Debug, Clone, Copy, Default)]
struct UnionSettings {
    case_insensitive: bool,
    invalidation: InvalidationPolicy,
}

/// State shared by the union handle and (weakly) by every union entry.
pub(crate) struct UnionState {
    backends: RwLock<Vec<Arc<dyn FileSystem>>>,
    settings: RwLock<UnionSettings>,
    root: Arc<UnionEntry>,
}

impl UnionState {
    /// Snapshot of the backend list, so no lock is held while backends run.
    pub(crate) fn backends(&self) -> Vec<Arc<dyn FileSystem>> {
        self.backends.read().clone()
    }

    pub(crate) fn supported_operations(&self) -> Operations {
        self.backends
            .read()
            .iter()
            .fold(Operations::empty(), |acc, fs| acc | fs.supported_operations())
    }

    pub(crate) fn case_insensitive(&self) -> bool {
        self.settings.read().case_insensitive
    }

    pub(crate) fn invalidation(&self) -> InvalidationPolicy {
        self.settings.read().invalidation
    }

    pub(crate) fn root(&self) -> &Arc<UnionEntry> {
        &self.root
    }
}

/// A filesystem made of other filesystems.
///
/// Cloning yields another handle onto the same union. A union is itself a
/// [`FileSystem`], so unions nest.
#[derive(Clone)]
pub struct UnionFileSystem {
    state: Arc<UnionState>,
}

impl std::fmt::Debug for UnionFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionFileSystem")
            .field("backends", &self.backend_names())
            .field("settings", &*self.state.settings.read())
            .finish()
    }
}

impl Default for UnionFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl UnionFileSystem {
    /// Create an empty union.
    pub fn new() -> Self {
        let state = Arc::new_cyclic(|weak| UnionState {
            backends: RwLock::new(Vec::new()),
            settings: RwLock::new(UnionSettings::default()),
            root: Arc::new(UnionEntry::root(weak.clone())),
        });
        Self { state }
    }

    /// Append a backend. Earlier backends take priority.
    ///
    /// Listings cached before the call do not see the new backend until
    /// they are invalidated.
    pub fn add_backend(&self, fs: impl FileSystem + 'static) {
        self.add_backend_arc(Arc::new(fs));
    }

    /// Append a backend (already wrapped in Arc).
    pub fn add_backend_arc(&self, fs: Arc<dyn FileSystem>) {
        tracing::debug!(
            backend = %fs.name(),
            ops = %fs.supported_operations().short(),
            "adding union backend"
        );
        self.state.backends.write().push(fs);
    }

    /// Number of backends.
    pub fn backend_count(&self) -> usize {
        self.state.backends.read().len()
    }

    /// Display names of the backends, in priority order.
    pub fn backend_names(&self) -> Vec<String> {
        self.state.backends.read().iter().map(|fs| fs.name()).collect()
    }

    /// Fold names to lowercase for lookups and listing keys.
    ///
    /// Children cached before the call keep their old keys until
    /// invalidated.
    pub fn set_case_insensitive(&self, case_insensitive: bool) {
        self.state.settings.write().case_insensitive = case_insensitive;
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.state.case_insensitive()
    }

    pub fn set_invalidation_policy(&self, policy: InvalidationPolicy) {
        self.state.settings.write().invalidation = policy;
    }

    pub fn invalidation_policy(&self) -> InvalidationPolicy {
        self.state.invalidation()
    }

    /// The union's root entry, with its concrete type.
    pub fn union_root(&self) -> Arc<UnionEntry> {
        self.state.root.clone()
    }

    /// Resolve a path from the root. The empty path is the root itself.
    pub fn entry(&self, path: &str) -> VfsResult<Option<Arc<UnionEntry>>> {
        let rel = path::normalize(path, self.state.case_insensitive());
        if rel.is_empty() {
            return Ok(Some(self.union_root()));
        }
        self.state.root.lookup(&rel)
    }

    /// Drop every cached listing. The next access rescans from the root.
    pub fn invalidate_all(&self) {
        self.state.root.invalidate();
    }

    /// Warm the listing cache down to `depth` levels below the root.
    ///
    /// Depth 1 scans the root, depth 2 the root and its directories, and so
    /// on. Zero scans nothing.
    #[tracing::instrument(skip(self), name = "union.populate")]
    pub fn populate(&self, depth: usize) -> VfsResult<()> {
        self.state.root.populate(depth)
    }
}

impl FileSystem for UnionFileSystem {
    fn root(&self) -> Arc<dyn Entry> {
        self.union_root()
    }

    fn supported_operations(&self) -> Operations {
        self.state.supported_operations()
    }

    fn name(&self) -> String {
        format!("union[{}]", self.backend_names().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::{ArchiveFileSystem, MemoryFileSystem, StoredArchive};
    use crate::vfs::conformance::{self, InstrumentedFileSystem};
    use kasane_types::{EntryType, OpenMode, VfsError};
    use proptest::prelude::*;
    use std::io::Write;

    fn layer(ops: Operations, files: &[(&str, &str)]) -> MemoryFileSystem {
        let fs = MemoryFileSystem::with_operations(ops);
        for (path, data) in files {
            fs.add_file(path, *data).unwrap();
        }
        fs
    }

    fn names(entry: &dyn Entry) -> Vec<String> {
        entry
            .list_children()
            .unwrap()
            .iter()
            .map(|c| path::file_name(c.path()).to_string())
            .collect()
    }

    #[test]
    fn test_empty_union() {
        let union = UnionFileSystem::new();
        assert_eq!(union.supported_operations(), Operations::empty());
        assert_eq!(union.backend_count(), 0);
        assert_eq!(union.name(), "union[]");

        let root = union.root();
        assert!(root.is_root());
        assert_eq!(root.entry_type(), EntryType::Directory);
        let err = root.list_children().unwrap_err();
        assert!(matches!(err, VfsError::Unsupported(_)));
    }

    #[test]
    fn test_supported_operations_is_union_of_backends() {
        let union = UnionFileSystem::new();
        union.add_backend(MemoryFileSystem::with_operations(Operations::READ));
        assert_eq!(union.supported_operations(), Operations::READ);

        union.add_backend(MemoryFileSystem::with_operations(
            Operations::CREATE | Operations::DELETE,
        ));
        assert_eq!(
            union.supported_operations(),
            Operations::READ | Operations::CREATE | Operations::DELETE
        );
        assert_eq!(union.name(), "union[memory, memory]");
    }

    #[test]
    fn test_shadowing() {
        let union = UnionFileSystem::new();
        union.add_backend(layer(Operations::READ, &[("a.txt", "top"), ("only_top", "t")]));
        union.add_backend(layer(Operations::READ, &[("a.txt", "bottom"), ("only_bottom", "b")]));

        let root = union.union_root();
        assert_eq!(names(root.as_ref()), ["a.txt", "only_top", "only_bottom"]);

        let a = union.entry("a.txt").unwrap().unwrap();
        assert_eq!(a.backend_index(), Some(0));
        assert_eq!(a.read_to_end().unwrap(), b"top");

        let b = union.entry("/only_bottom").unwrap().unwrap();
        assert_eq!(b.backend_index(), Some(1));
    }

    #[test]
    fn test_directories_merge() {
        let union = UnionFileSystem::new();
        union.add_backend(layer(Operations::READ, &[("docs/a.md", "a")]));
        union.add_backend(layer(Operations::READ, &[("docs/b.md", "b"), ("docs/a.md", "old")]));

        let docs = union.entry("docs").unwrap().unwrap();
        assert_eq!(names(docs.as_ref()), ["a.md", "b.md"]);
        assert_eq!(
            union.entry("docs/a.md").unwrap().unwrap().read_to_end().unwrap(),
            b"a"
        );
    }

    #[test]
    fn test_file_shadows_directory() {
        let union = UnionFileSystem::new();
        union.add_backend(layer(Operations::READ, &[("thing", "file")]));
        union.add_backend(layer(Operations::READ, &[("thing/inner.txt", "x")]));

        assert_eq!(names(union.root().as_ref()), ["thing"]);
        let thing = union.entry("thing").unwrap().unwrap();
        assert_eq!(thing.entry_type(), EntryType::File);
        let err = union.root().child("thing/inner.txt").unwrap_err();
        assert!(matches!(err, VfsError::NotADirectory(_)));
    }

    #[test]
    fn test_child_of_file_is_not_a_directory() {
        let union = UnionFileSystem::new();
        union.add_backend(layer(Operations::READ, &[("a.txt", "a")]));
        let a = union.entry("a.txt").unwrap().unwrap();
        assert!(matches!(a.child("x").unwrap_err(), VfsError::NotADirectory(_)));
        assert!(matches!(a.child("").unwrap_err(), VfsError::NotADirectory(_)));
        assert!(matches!(
            a.list_children().unwrap_err(),
            VfsError::NotADirectory(_)
        ));
    }

    #[test]
    fn test_populate_scans_each_directory_once() {
        let probe = InstrumentedFileSystem::new(layer(
            Operations::READ,
            &[("a/b/c.txt", "c"), ("x/y.txt", "y")],
        ));
        let calls = probe.probe();
        let union = UnionFileSystem::new();
        union.add_backend(probe);

        union.populate(2).unwrap();
        // Root, then `a` and `x`.
        assert_eq!(calls.list_calls(), 3);

        calls.reset();
        union.entry("a").unwrap().unwrap().list_children().unwrap();
        union.entry("x/y.txt").unwrap().unwrap();
        assert_eq!(calls.list_calls(), 0);

        // `a/b` was beyond the populated depth.
        union.entry("a/b/c.txt").unwrap().unwrap();
        assert_eq!(calls.list_calls(), 1);
    }

    #[test]
    fn test_populate_zero_is_a_no_op() {
        let probe = InstrumentedFileSystem::new(layer(Operations::READ, &[("a.txt", "a")]));
        let calls = probe.probe();
        let union = UnionFileSystem::new();
        union.add_backend(probe);

        union.populate(0).unwrap();
        assert_eq!(calls.list_calls(), 0);
        assert!(union.union_root().is_dirty());
    }

    #[test]
    fn test_open_unsupported_when_no_backend_writes() {
        let union = UnionFileSystem::new();
        union.add_backend(layer(Operations::READ, &[("a.txt", "a")]));
        let a = union.entry("a.txt").unwrap().unwrap();

        assert!(matches!(
            a.open(OpenMode::WRITE).err().unwrap(),
            VfsError::Unsupported(_)
        ));
        assert!(matches!(
            union.root().open(OpenMode::READ).err().unwrap(),
            VfsError::WrongType(_)
        ));
    }

    #[test]
    fn test_write_through_union() {
        let top = MemoryFileSystem::new();
        let union = UnionFileSystem::new();
        union.add_backend(top.clone());

        let created = union
            .root()
            .create_entry(EntryType::File, "notes.txt")
            .unwrap();
        {
            let mut stream = created.open(OpenMode::WRITE).unwrap();
            stream.write_all(b"written").unwrap();
        }
        assert_eq!(
            top.root().child("notes.txt").unwrap().unwrap().read_to_end().unwrap(),
            b"written"
        );
    }

    #[test]
    fn test_rename_root_fails() {
        let union = UnionFileSystem::new();
        union.add_backend(MemoryFileSystem::new());
        let err = union.root().rename("elsewhere").unwrap_err();
        assert!(matches!(err, VfsError::Backend(_)));
    }

    #[test]
    fn test_late_backend_needs_invalidation() {
        let union = UnionFileSystem::new();
        union.add_backend(layer(Operations::READ, &[("a.txt", "a")]));
        union.populate(1).unwrap();

        union.add_backend(layer(Operations::READ, &[("b.txt", "b")]));
        assert!(union.entry("b.txt").unwrap().is_none());

        union.invalidate_all();
        assert!(union.entry("b.txt").unwrap().is_some());
    }

    #[test]
    fn test_entry_outlives_union_state() {
        let union = UnionFileSystem::new();
        union.add_backend(layer(Operations::READ, &[("a.txt", "a")]));
        let a = union.entry("a.txt").unwrap().unwrap();
        drop(union);

        assert_eq!(a.entry_type(), EntryType::File);
        let err = a.read_to_end().unwrap_err();
        assert!(matches!(err, VfsError::Backend(_)));
    }

    #[test]
    fn test_archive_under_writable_layer() {
        let archive = StoredArchive::new()
            .with_file("textures/grass.png", "base grass")
            .with_file("textures/stone.png", "base stone");
        let overlay = layer(Operations::all(), &[("textures/grass.png", "mod grass")]);

        let union = UnionFileSystem::new();
        union.add_backend(overlay);
        union.add_backend(ArchiveFileSystem::new(archive).unwrap());

        let textures = union.entry("textures").unwrap().unwrap();
        assert_eq!(names(textures.as_ref()), ["grass.png", "stone.png"]);
        assert_eq!(
            union.entry("textures/grass.png").unwrap().unwrap().read_to_end().unwrap(),
            b"mod grass"
        );
        assert_eq!(
            union.entry("textures/stone.png").unwrap().unwrap().read_to_end().unwrap(),
            b"base stone"
        );
    }

    #[test]
    fn test_conformance_single_layer() {
        let fs = MemoryFileSystem::new();
        for (path, data) in conformance::FIXTURE {
            fs.add_file(path, *data).unwrap();
        }
        let union = UnionFileSystem::new();
        union.set_invalidation_policy(InvalidationPolicy::Eager);
        union.add_backend(fs);
        conformance::check_read_contract(&union).unwrap();
        conformance::check_write_contract(&union).unwrap();
    }

    #[test]
    fn test_invalidation_policy_names() {
        use std::str::FromStr;
        assert_eq!(
            InvalidationPolicy::from_str("EAGER").unwrap(),
            InvalidationPolicy::Eager
        );
        assert_eq!(InvalidationPolicy::default().to_string(), "lazy");
    }

    proptest! {
        #[test]
        fn folded_lookups_reach_the_same_entry(
            upper in proptest::collection::vec(any::<bool>(), 13),
            pad in "[ /]{0,3}",
        ) {
            let union = UnionFileSystem::new();
            union.set_case_insensitive(true);
            union.add_backend(layer(Operations::READ, &[("Docs/Guide.md", "g")]));
            union.add_backend(layer(Operations::READ, &[("DOCS/GUIDE.MD", "shadowed")]));

            let spelled: String = "docs/guide.md"
                .chars()
                .zip(&upper)
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            let entry = union.entry(&format!("{pad}{spelled}{pad}")).unwrap().unwrap();
            prop_assert_eq!(entry.path(), "Docs/Guide.md");
            prop_assert_eq!(entry.backend_index(), Some(0));
        }
    }
}
