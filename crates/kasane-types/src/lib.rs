//! Shared types for kasane (重ね), the layered virtual filesystem.
//!
//! This crate is the leaf everything else builds on: path normalization,
//! the capability model, entry types and the error taxonomy. It has **no
//! internal kasane dependencies**.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------------|
//! | Type              | Purpose                                            |
//! |-------------------|----------------------------------------------------|
//! | [`Operations`]    | What a filesystem may be asked to do (R/W/D/C)     |
//! | [`Operation`]     | A single capability, by name (config, CLI)         |
//! | [`OpenMode`]      | How a byte stream is opened                        |
//! | [`EntryType`]     | Unknown / Directory / File                         |
//! | [`VfsError`]      | Every failure, tagged with an [`ErrorKind`]        |
//! |-------------------|----------------------------------------------------|

pub mod caps;
pub mod error;
pub mod kind;
pub mod path;

pub use caps::{OpenMode, Operation, Operations};
pub use error::{ErrorKind, VfsError, VfsResult};
pub use kind::EntryType;
