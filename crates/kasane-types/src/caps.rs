//! The capability model.
//!
//! A filesystem advertises the [`Operations`] it may be asked to perform. A
//! byte stream is requested with an [`OpenMode`], which maps onto the
//! operations it needs: `READ → READ`, `WRITE → WRITE`. `MEMORY_MAPPED` is a
//! backend-local affordance with no capability requirement; a provider may
//! refuse it.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

bitflags::bitflags! {
    /// Operations a filesystem supports.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Operations: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const DELETE = 1 << 2;
        const CREATE = 1 << 3;
    }
}

bitflags::bitflags! {
    /// How a byte stream is opened.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const MEMORY_MAPPED = 1 << 2;
    }
}

impl Default for Operations {
    fn default() -> Self {
        Self::all()
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        Self::READ
    }
}

impl OpenMode {
    /// Operations a filesystem must support to honour this mode.
    ///
    /// An empty result means the mode requests nothing and is invalid.
    pub fn required_operations(self) -> Operations {
        let mut ops = Operations::empty();
        if self.contains(OpenMode::READ) {
            ops |= Operations::READ;
        }
        if self.contains(OpenMode::WRITE) {
            ops |= Operations::WRITE;
        }
        ops
    }
}

/// A single operation, addressable by name.
///
/// Used where capabilities are spelled out by humans: manifests and the CLI.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Operation {
    #[strum(to_string = "read", serialize = "r")]
    Read,
    #[strum(to_string = "write", serialize = "w")]
    Write,
    #[strum(to_string = "delete", serialize = "d")]
    Delete,
    #[strum(to_string = "create", serialize = "c")]
    Create,
}

impl From<Operation> for Operations {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Read => Operations::READ,
            Operation::Write => Operations::WRITE,
            Operation::Delete => Operations::DELETE,
            Operation::Create => Operations::CREATE,
        }
    }
}

impl FromIterator<Operation> for Operations {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Operations::empty(), |acc, op| acc | Operations::from(op))
    }
}

impl Operations {
    /// Compact `rwdc` rendering, `-` for missing bits (e.g. `r---`).
    pub fn short(self) -> String {
        [
            (Operations::READ, 'r'),
            (Operations::WRITE, 'w'),
            (Operations::DELETE, 'd'),
            (Operations::CREATE, 'c'),
        ]
        .iter()
        .map(|(op, c)| if self.contains(*op) { *c } else { '-' })
        .collect()
    }
}
