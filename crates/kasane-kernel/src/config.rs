//! Union manifests.
//!
//! A manifest is a RON document describing a union: its backends in
//! priority order, what each may do, and how the union caches.
//!
//! ```ron
//! (
//!     case_insensitive: false,
//!     invalidation: Lazy,
//!     populate_depth: 2,
//!     backends: [
//!         (kind: Local(root: "./mods"), operations: ["read", "write", "create", "delete"]),
//!         (kind: Local(root: "./base"), operations: ["read"]),
//!     ],
//! )
//! ```
//!
//! Relative local roots resolve against the manifest file's directory when
//! the manifest is loaded from disk, and against the working directory
//! otherwise.

use ron::extensions::Extensions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use kasane_types::{Operation, Operations, VfsError};

use crate::vfs::{
    FileSystem, InvalidationPolicy, LocalFileSystem, MemoryFileSystem, UnionFileSystem,
};

/// Errors that can occur when loading or building a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("unknown operation {0:?} (expected read, write, delete, create or r, w, d, c)")]
    UnknownOperation(String),
    #[error("backend root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("manifest lists no backends")]
    NoBackends,
    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// Description of a union filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionManifest {
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub invalidation: InvalidationPolicy,
    /// Warm the listing cache this many levels deep after building.
    #[serde(default)]
    pub populate_depth: Option<usize>,
    /// Highest priority first.
    pub backends: Vec<BackendSpec>,
    /// Directory relative roots resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// One backend in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    pub kind: BackendKind,
    /// Operation names; the backend's default when absent.
    #[serde(default)]
    pub operations: Option<Vec<String>>,
}

/// Which provider backs a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendKind {
    /// A directory on disk.
    Local { root: PathBuf },
    /// An in-memory tree seeded with `path → contents`.
    Memory {
        #[serde(default)]
        files: BTreeMap<String, String>,
    },
    /// A nested union.
    Union(Box<UnionManifest>),
}

fn ron_options() -> ron::Options {
    ron::Options::default()
        .with_default_extension(Extensions::IMPLICIT_SOME)
        .with_default_extension(Extensions::UNWRAP_VARIANT_NEWTYPES)
}

/// Parse operation names (`read`, `w`, ...) into a bitset.
///
/// Tokens that are not a name are read as a run of single-letter
/// abbreviations, so `rw` means read and write.
pub fn parse_operations<S: AsRef<str>>(tokens: &[S]) -> Result<Operations, ConfigError> {
    let mut ops = Operations::empty();
    for token in tokens {
        let token = token.as_ref().trim();
        if let Ok(op) = Operation::from_str(token) {
            ops |= Operations::from(op);
            continue;
        }
        for letter in token.chars() {
            let op = Operation::from_str(letter.encode_utf8(&mut [0; 4]))
                .map_err(|_| ConfigError::UnknownOperation(token.to_string()))?;
            ops |= Operations::from(op);
        }
    }
    Ok(ops)
}

impl FromStr for UnionManifest {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(ron_options().from_str(text)?)
    }
}

impl UnionManifest {
    /// A manifest stacking `backends`, highest priority first.
    pub fn new(backends: Vec<BackendSpec>) -> Self {
        Self {
            case_insensitive: false,
            invalidation: InvalidationPolicy::default(),
            populate_depth: None,
            backends,
            base_dir: None,
        }
    }

    /// Read a manifest file. Relative roots resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut manifest: Self = text.parse()?;
        manifest.base_dir = path.parent().map(Path::to_path_buf);
        tracing::debug!(
            path = %path.display(),
            backends = manifest.backends.len(),
            "loaded union manifest"
        );
        Ok(manifest)
    }

    /// Build the union this manifest describes.
    pub fn build(&self) -> Result<UnionFileSystem, ConfigError> {
        self.build_in(self.base_dir.as_deref())
    }

    fn build_in(&self, base_dir: Option<&Path>) -> Result<UnionFileSystem, ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        let base_dir = self.base_dir.as_deref().or(base_dir);

        let union = UnionFileSystem::new();
        union.set_case_insensitive(self.case_insensitive);
        union.set_invalidation_policy(self.invalidation);
        for spec in &self.backends {
            union.add_backend_arc(spec.build_in(base_dir)?);
        }
        if let Some(depth) = self.populate_depth {
            union.populate(depth)?;
        }
        Ok(union)
    }
}

impl BackendSpec {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            kind: BackendKind::Local { root: root.into() },
            operations: None,
        }
    }

    /// Restrict the backend to `operations` (names or letters).
    pub fn with_operations<S: Into<String>>(
        mut self,
        operations: impl IntoIterator<Item = S>,
    ) -> Self {
        self.operations = Some(operations.into_iter().map(Into::into).collect());
        self
    }

    fn operations(&self) -> Result<Option<Operations>, ConfigError> {
        self.operations
            .as_deref()
            .map(parse_operations)
            .transpose()
    }

    fn build_in(&self, base_dir: Option<&Path>) -> Result<Arc<dyn FileSystem>, ConfigError> {
        let operations = self.operations()?;
        match &self.kind {
            BackendKind::Local { root } => {
                let root = match base_dir {
                    Some(base) if root.is_relative() => base.join(root),
                    _ => root.clone(),
                };
                if !root.is_dir() {
                    return Err(ConfigError::MissingRoot(root));
                }
                let fs = LocalFileSystem::new(root);
                if let Some(ops) = operations {
                    fs.set_allowed_operations(ops);
                }
                Ok(Arc::new(fs))
            }
            BackendKind::Memory { files } => {
                let fs = MemoryFileSystem::with_operations(operations.unwrap_or(Operations::all()));
                for (path, contents) in files {
                    fs.add_file(path, contents.as_str())?;
                }
                Ok(Arc::new(fs))
            }
            BackendKind::Union(manifest) => {
                if operations.is_some() {
                    tracing::warn!("operations are ignored on nested unions");
                }
                Ok(Arc::new(manifest.build_in(base_dir)?))
            }
        }
    }
}

/// `DIR[:OPS]`, as given on the command line. `OPS` is a comma-separated
/// list of names or letters: `./base:r`, `./mods:read,write,create`.
impl FromStr for BackendSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (root, ops) = match s.rsplit_once(':') {
            Some((root, ops)) if !root.is_empty() => (root, Some(ops)),
            _ => (s, None),
        };
        let mut spec = BackendSpec::local(root);
        if let Some(ops) = ops {
            let tokens: Vec<&str> = ops.split(',').filter(|t| !t.is_empty()).collect();
            parse_operations(&tokens)?;
            spec = spec.with_operations(tokens);
        }
        Ok(spec)
    }
}
