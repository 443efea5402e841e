//! Union entries: the cached, merged view of one path.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use kasane_types::path;
use kasane_types::{EntryType, OpenMode, Operations, VfsError, VfsResult};

use super::{InvalidationPolicy, UnionState};
use crate::vfs::ops::{ByteStream, Entry, FileSystem, required_for_open, resolve};

#[derive(Default)]
struct ChildCache {
    /// Local name (case-folded per union setting) → merged child.
    children: IndexMap<String, Arc<UnionEntry>>,
    dirty: bool,
}

/// One path in a [`UnionFileSystem`](super::UnionFileSystem).
///
/// Holds the *primary*: the entry from the highest-priority backend that has
/// a node here. Directory entries additionally cache their merged children.
pub struct UnionEntry {
    union: Weak<UnionState>,
    path: String,
    /// `None` only for the root.
    primary: Option<Arc<dyn Entry>>,
    backend_index: Option<usize>,
    cache: Mutex<ChildCache>,
}

impl std::fmt::Debug for UnionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionEntry")
            .field("path", &self.path)
            .field("backend_index", &self.backend_index)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl UnionEntry {
    pub(super) fn root(union: Weak<UnionState>) -> Self {
        Self::new(union, String::new(), None, None)
    }

    fn new(
        union: Weak<UnionState>,
        path: String,
        primary: Option<Arc<dyn Entry>>,
        backend_index: Option<usize>,
    ) -> Self {
        Self {
            union,
            path,
            primary,
            backend_index,
            cache: Mutex::new(ChildCache {
                children: IndexMap::new(),
                dirty: true,
            }),
        }
    }

    fn state(&self) -> VfsResult<Arc<UnionState>> {
        self.union.upgrade().ok_or_else(|| {
            VfsError::backend(format!(
                "union filesystem was dropped while {:?} was in use",
                self.path
            ))
        })
    }

    // ========================================================================
    // Provenance and cache control
    // ========================================================================

    /// The backend entry that supplies this path.
    pub fn primary(&self) -> Option<&Arc<dyn Entry>> {
        self.primary.as_ref()
    }

    /// Index (priority order) of the backend that supplies this path.
    pub fn backend_index(&self) -> Option<usize> {
        self.backend_index
    }

    /// Mark the cached listing stale. The next access rescans.
    pub fn invalidate(&self) {
        self.cache.lock().dirty = true;
    }

    /// Returns true if the next listing access will rescan the backends.
    pub fn is_dirty(&self) -> bool {
        self.cache.lock().dirty
    }

    /// Rebuild the merged listing now.
    pub fn cache_children(&self) -> VfsResult<()> {
        let state = self.state()?;
        let mut cache = self.cache.lock();
        self.scan(&state, &mut cache)
    }

    /// Scan every readable backend and merge their listings of this path.
    ///
    /// Children are rebuilt from scratch, so caches below this entry are
    /// discarded along with it.
    fn scan(&self, state: &UnionState, cache: &mut ChildCache) -> VfsResult<()> {
        let fold = state.case_insensitive();
        let mut children: IndexMap<String, Arc<UnionEntry>> = IndexMap::new();

        for (index, backend) in state.backends().iter().enumerate() {
            if !backend.supports(Operations::READ) {
                continue;
            }
            let Some(dir) = resolve(backend.as_ref(), &self.path)? else {
                continue;
            };
            if !dir.entry_type().is_dir() {
                continue;
            }

            for child in dir.list_children()? {
                let child_path = path::normalize(child.path(), false);
                let name = path::normalize(path::file_name(&child_path), fold);
                if name.is_empty() || children.contains_key(&name) {
                    continue;
                }
                let entry =
                    UnionEntry::new(self.union.clone(), child_path, Some(child), Some(index));
                children.insert(name, Arc::new(entry));
            }
        }

        tracing::debug!(path = %self.path, children = children.len(), "cached union listing");
        cache.children = children;
        cache.dirty = false;
        Ok(())
    }

    /// Look up a direct child by local name, scanning first if dirty.
    fn cached_child(&self, state: &UnionState, name: &str) -> VfsResult<Option<Arc<UnionEntry>>> {
        let mut cache = self.cache.lock();
        if cache.dirty {
            self.scan(state, &mut cache)?;
        }
        Ok(cache.children.get(name).cloned())
    }

    fn cached_children(&self, state: &UnionState) -> VfsResult<Vec<Arc<UnionEntry>>> {
        let mut cache = self.cache.lock();
        if cache.dirty {
            self.scan(state, &mut cache)?;
        }
        Ok(cache.children.values().cloned().collect())
    }

    fn require_dir(&self) -> VfsResult<()> {
        if self.entry_type().is_dir() {
            Ok(())
        } else {
            Err(VfsError::not_a_directory(self.path.clone()))
        }
    }

    fn require(&self, state: &UnionState, ops: Operations, what: &str) -> VfsResult<()> {
        if state.supported_operations().contains(ops) {
            Ok(())
        } else {
            Err(VfsError::unsupported(format!(
                "no filesystem in the union supports {what}: {}",
                self.path
            )))
        }
    }

    /// Resolve a normalized (and, if applicable, case-folded) relative path.
    ///
    /// Walks cached listings one component at a time, scanning only the
    /// directories that are dirty.
    pub(super) fn lookup(&self, rel: &str) -> VfsResult<Option<Arc<UnionEntry>>> {
        let state = self.state()?;
        self.require_dir()?;

        let mut components = path::components(rel);
        let Some(first) = components.next() else {
            return Ok(None);
        };
        let Some(mut current) = self.cached_child(&state, first)? else {
            return Ok(None);
        };
        for component in components {
            current.require_dir()?;
            match current.cached_child(&state, component)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    pub(super) fn populate(&self, depth: usize) -> VfsResult<()> {
        if depth == 0 {
            return Ok(());
        }
        let state = self.state()?;
        let children = {
            let mut cache = self.cache.lock();
            self.scan(&state, &mut cache)?;
            cache.children.values().cloned().collect::<Vec<_>>()
        };
        for child in children {
            if child.entry_type().is_dir() {
                child.populate(depth - 1)?;
            }
        }
        Ok(())
    }

    fn invalidate_after_mutation(&self, state: &UnionState) {
        if state.invalidation() == InvalidationPolicy::Eager {
            self.invalidate();
        }
    }

    /// Name to hand a backend for a direct child, preserving the case it
    /// was listed with when the union folds case.
    fn backend_name(&self, state: &UnionState, local: &str) -> VfsResult<String> {
        if !state.case_insensitive() {
            return Ok(local.to_string());
        }
        Ok(self
            .cached_child(state, local)?
            .map(|child| path::file_name(&child.path).to_string())
            .unwrap_or_else(|| local.to_string()))
    }
}

impl Entry for UnionEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        match &self.primary {
            Some(primary) => primary.entry_type(),
            None => EntryType::Directory,
        }
    }

    fn last_write_time(&self) -> SystemTime {
        match &self.primary {
            Some(primary) => primary.last_write_time(),
            None => SystemTime::UNIX_EPOCH,
        }
    }

    fn child(&self, name: &str) -> VfsResult<Option<Arc<dyn Entry>>> {
        let state = self.state()?;
        self.require_dir()?;
        let rel = path::normalize(name, state.case_insensitive());
        if rel.is_empty() {
            return Ok(None);
        }
        Ok(self.lookup(&rel)?.map(|e| e as Arc<dyn Entry>))
    }

    fn list_children(&self) -> VfsResult<Vec<Arc<dyn Entry>>> {
        let state = self.state()?;
        self.require(&state, Operations::READ, "listing")?;
        self.require_dir()?;
        Ok(self
            .cached_children(&state)?
            .into_iter()
            .map(|e| e as Arc<dyn Entry>)
            .collect())
    }

    fn num_children(&self) -> VfsResult<usize> {
        let state = self.state()?;
        self.require(&state, Operations::READ, "listing")?;
        self.require_dir()?;
        let mut cache = self.cache.lock();
        if cache.dirty {
            self.scan(&state, &mut cache)?;
        }
        Ok(cache.children.len())
    }

    #[tracing::instrument(skip(self), fields(path = %self.path), name = "union.open")]
    fn open(&self, mode: OpenMode) -> VfsResult<Box<dyn ByteStream>> {
        let state = self.state()?;
        let required = required_for_open(mode, state.supported_operations(), &self.path)?;
        if !self.entry_type().is_file() {
            return Err(VfsError::wrong_type(self.path.clone()));
        }

        if let Some(primary) = &self.primary {
            match primary.open(mode) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!(error = %e, "primary open failed, trying other backends");
                }
            }
        }

        for (index, backend) in state.backends().iter().enumerate() {
            if Some(index) == self.backend_index || !backend.supports(required) {
                continue;
            }
            let candidate = match resolve(backend.as_ref(), &self.path) {
                Ok(Some(entry)) if entry.entry_type().is_file() => entry,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(
                        backend = %backend.name(),
                        error = %e,
                        "fallback lookup failed"
                    );
                    continue;
                }
            };
            match candidate.open(mode) {
                Ok(stream) => {
                    tracing::debug!(backend = %backend.name(), "opened from fallback backend");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(backend = %backend.name(), error = %e, "fallback open failed");
                }
            }
        }

        Err(VfsError::backend(format!(
            "no filesystem could open {}",
            self.path
        )))
    }

    fn delete_child(&self, name: &str) -> VfsResult<bool> {
        let state = self.state()?;
        self.require(&state, Operations::DELETE, "deleting")?;
        self.require_dir()?;

        let rel = path::normalize(name, state.case_insensitive());
        if rel.is_empty() {
            return Ok(false);
        }

        // Delete from the directory that directly holds the name, so only
        // that directory's listing goes stale.
        let (first, rest) = path::split_first(&rel);
        if let Some(rest) = rest {
            return match self.cached_child(&state, first)? {
                Some(child) => child.delete_child(rest),
                None => Ok(false),
            };
        }

        let target = self.backend_name(&state, first)?;
        let mut deleted = false;
        for backend in state.backends() {
            if !backend.supports(Operations::DELETE) {
                continue;
            }
            let dir = match resolve(backend.as_ref(), &self.path) {
                Ok(Some(dir)) if dir.entry_type().is_dir() => dir,
                Ok(_) => continue,
                Err(e) if e.is_invalid_operation() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        backend = %backend.name(),
                        path = %self.path,
                        error = %e,
                        "delete lookup failed"
                    );
                    continue;
                }
            };
            match dir.delete_child(&target) {
                Ok(removed) => deleted |= removed,
                Err(e) if e.is_invalid_operation() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        backend = %backend.name(),
                        path = %self.path,
                        name = %target,
                        error = %e,
                        "backend delete failed"
                    );
                }
            }
        }

        if deleted {
            self.invalidate_after_mutation(&state);
        }
        Ok(deleted)
    }

    fn create_entry(&self, kind: EntryType, name: &str) -> VfsResult<Arc<dyn Entry>> {
        let state = self.state()?;
        self.require(&state, Operations::CREATE, "creating")?;
        if !kind.is_creatable() {
            return Err(VfsError::invalid_type(kind.to_string()));
        }
        self.require_dir()?;

        let rel = path::normalize(name, false);
        if rel.is_empty() {
            return Err(VfsError::invalid_path("empty entry name"));
        }

        for (index, backend) in state.backends().iter().enumerate() {
            if !backend.supports(Operations::CREATE) {
                continue;
            }
            let dir = match resolve(backend.as_ref(), &self.path) {
                Ok(Some(dir)) if dir.entry_type().is_dir() => dir,
                Ok(_) => continue,
                Err(e) if e.is_invalid_operation() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        backend = %backend.name(),
                        path = %self.path,
                        error = %e,
                        "create lookup failed"
                    );
                    continue;
                }
            };
            match dir.create_entry(kind, &rel) {
                Ok(created) => {
                    self.invalidate_after_mutation(&state);
                    let created_path = path::normalize(created.path(), false);
                    return Ok(Arc::new(UnionEntry::new(
                        self.union.clone(),
                        created_path,
                        Some(created),
                        Some(index),
                    )));
                }
                Err(e) if e.is_invalid_operation() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        backend = %backend.name(),
                        path = %self.path,
                        name = %rel,
                        error = %e,
                        "backend create failed"
                    );
                }
            }
        }

        Err(VfsError::backend(format!(
            "no filesystem could create {}",
            path::join(&self.path, &rel)
        )))
    }

    fn rename(&self, new_path: &str) -> VfsResult<()> {
        let Some(primary) = &self.primary else {
            return Err(VfsError::backend("cannot rename the root"));
        };
        let state = self.state()?;
        primary.rename(new_path)?;

        let parent = match path::parent(&self.path) {
            Some(parent) => {
                let folded = path::normalize(parent, state.case_insensitive());
                state.root().lookup(&folded).ok().flatten()
            }
            None => None,
        };
        match parent {
            Some(parent) => parent.invalidate(),
            None => state.root().invalidate(),
        }
        Ok(())
    }
}
