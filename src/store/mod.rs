// src/store/mod.rs

//! Package store contract
//!
//! The install pipeline treats the store as a black box: it asks where to
//! stage an upload, has the store validate and commit it, and reads back the
//! registered id. `LocalStore` is the SQLite + filesystem implementation.

pub mod archive;
pub mod local;

pub use local::LocalStore;

use crate::error::Result;
use crate::hub::{CatalogEntry, PackageVersion, VersionedName};
use crate::privilege::Principal;
use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Kinds of diagnostic messages a store accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Info,
}

/// What the install pipeline needs from a package store
pub trait PackageStore {
    /// Highest installed version of `id`, if any
    fn installed_version(&self, id: &str) -> Result<Option<PackageVersion>>;

    /// Whether `entry` is a newer patch of an installed major.minor
    fn is_newer_available(&self, entry: &CatalogEntry) -> Result<bool>;

    fn is_restricted(&self, id: &str, major: u32, minor: u32) -> Result<bool>;

    /// Where the pipeline must write the downloaded archive
    fn expected_upload_path(&self) -> PathBuf;

    /// Where `validate` unpacks the archive
    fn expected_extraction_path(&self) -> PathBuf;

    /// Check the staged archive. `Ok(false)` means invalid; the reasons are
    /// available from `drain_messages(MessageKind::Error)`.
    fn validate(&self, archive: &Path, principal: &Principal) -> Result<bool>;

    /// Take and clear the accumulated messages of one kind
    fn drain_messages(&self, kind: MessageKind) -> Vec<String>;

    /// Unpack, register and persist the last validated package
    fn commit(&self, principal: &Principal) -> Result<()>;

    fn lookup_local_id(&self, name: &VersionedName) -> Result<Option<i64>>;

    fn update_tutorial_url(&self, id: i64, url: &str) -> Result<()>;

    /// Remove a file or directory tree; a missing path is not an error
    fn delete_file_tree(&self, path: &Path) -> Result<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Per-kind message accumulator with drain semantics
#[derive(Debug, Default)]
pub struct MessageBuffer {
    errors: RefCell<Vec<String>>,
    info: RefCell<Vec<String>>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: MessageKind, message: impl Into<String>) {
        self.slot(kind).borrow_mut().push(message.into());
    }

    pub fn drain(&self, kind: MessageKind) -> Vec<String> {
        std::mem::take(&mut *self.slot(kind).borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.errors.borrow().is_empty() && self.info.borrow().is_empty()
    }

    fn slot(&self, kind: MessageKind) -> &RefCell<Vec<String>> {
        match kind {
            MessageKind::Error => &self.errors,
            MessageKind::Info => &self.info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_buffer_drains_per_kind() {
        let buffer = MessageBuffer::new();
        buffer.push(MessageKind::Error, "bad manifest");
        buffer.push(MessageKind::Info, "extracted");
        buffer.push(MessageKind::Error, "missing library.json");

        assert_eq!(
            buffer.drain(MessageKind::Error),
            vec!["bad manifest", "missing library.json"]
        );
        assert!(buffer.drain(MessageKind::Error).is_empty());
        assert!(!buffer.is_empty());

        assert_eq!(buffer.drain(MessageKind::Info), vec!["extracted"]);
        assert!(buffer.is_empty());
    }
}
