//! Entry types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What lives at a path.
///
/// `Unknown` means "nothing here". It is terminal and never cached as a
/// positive result.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EntryType {
    #[default]
    Unknown,
    Directory,
    File,
}

impl EntryType {
    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryType::Directory)
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, EntryType::File)
    }

    /// Returns true unless this is `Unknown`.
    pub fn exists(&self) -> bool {
        !matches!(self, EntryType::Unknown)
    }

    /// Whether entries of this type can be created.
    pub fn is_creatable(&self) -> bool {
        self.exists()
    }
}
