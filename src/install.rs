// src/install.rs

//! Install transaction for a single content type
//!
//! Stages run in order and stop at the first failure:
//! fetch → write → validate → commit → cleanup → verify → record.
//!
//! Once the archive write has started, staged files are removed and the
//! store's message buffers drained on every exit path. Validation and commit
//! run with the configured capability elevated for the acting principal.

use crate::hub::{ArchiveFetcher, CatalogEntry, VersionedName};
use crate::privilege::{CapabilityStore, Principal, with_elevated_capability};
use crate::store::{MessageKind, PackageStore};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where an install transaction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Fetch,
    Write,
    Validation,
    Commit,
    PostInstallCheck,
}

impl InstallStage {
    pub fn as_str(&self) -> &str {
        match self {
            InstallStage::Fetch => "fetch",
            InstallStage::Write => "write",
            InstallStage::Validation => "validation",
            InstallStage::Commit => "commit",
            InstallStage::PostInstallCheck => "post-install-check",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one install transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { local_id: i64 },
    Failed { stage: InstallStage, message: String },
}

impl InstallOutcome {
    fn failed(stage: InstallStage, message: impl Into<String>) -> Self {
        InstallOutcome::Failed {
            stage,
            message: message.into(),
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, InstallOutcome::Installed { .. })
    }
}

/// Staged upload and extraction folder; removed when dropped
struct StagingArea<'a> {
    store: &'a dyn PackageStore,
    upload: PathBuf,
    extraction: PathBuf,
}

impl<'a> StagingArea<'a> {
    fn new(store: &'a dyn PackageStore) -> Self {
        Self {
            store,
            upload: store.expected_upload_path(),
            extraction: store.expected_extraction_path(),
        }
    }

    /// Write the archive to the upload path, replacing any leftover file
    fn write(&self, bytes: &[u8]) -> Result<(), String> {
        let mut file = File::create(&self.upload).map_err(|e| {
            format!("Could not open file {} for writing: {}", self.upload.display(), e)
        })?;

        file.write_all(bytes)
            .map_err(|e| format!("Could not write to file {}: {}", self.upload.display(), e))?;

        file.sync_all()
            .map_err(|e| format!("Could not close file {}: {}", self.upload.display(), e))?;

        Ok(())
    }

    fn upload_path(&self) -> &Path {
        &self.upload
    }
}

impl Drop for StagingArea<'_> {
    fn drop(&mut self) {
        for path in [&self.extraction, &self.upload] {
            if let Err(e) = self.store.delete_file_tree(path) {
                warn!("Failed to remove staged {}: {}", path.display(), e);
            }
        }

        // Drop whatever validation and commit left behind so it does not
        // surface in a later, unrelated operation.
        for kind in [MessageKind::Error, MessageKind::Info] {
            for message in self.store.drain_messages(kind) {
                debug!("Discarding store message ({:?}): {}", kind, message);
            }
        }
    }
}

/// Runs install transactions against one store as one principal
pub struct Installer<'a> {
    fetcher: &'a dyn ArchiveFetcher,
    store: &'a dyn PackageStore,
    caps: &'a dyn CapabilityStore,
    principal: &'a Principal,
    capability: &'a str,
}

impl<'a> Installer<'a> {
    /// `capability` is held by `principal` only while validating and committing
    pub fn new(
        fetcher: &'a dyn ArchiveFetcher,
        store: &'a dyn PackageStore,
        caps: &'a dyn CapabilityStore,
        principal: &'a Principal,
        capability: &'a str,
    ) -> Self {
        Self {
            fetcher,
            store,
            caps,
            principal,
            capability,
        }
    }

    /// Install or upgrade the package described by `entry`
    pub fn install_package(&self, entry: &CatalogEntry) -> InstallOutcome {
        let Some(version) = entry.version else {
            return InstallOutcome::failed(
                InstallStage::Fetch,
                format!("Content type {} has no complete version", entry.id),
            );
        };
        let versioned_name = VersionedName::for_entry(&entry.id, &version);

        info!("Installing {} ({})", versioned_name, version);

        let bytes = match self.fetcher.fetch_archive(&entry.id) {
            Ok(bytes) => bytes,
            Err(e) => return InstallOutcome::failed(InstallStage::Fetch, e.to_string()),
        };
        debug!(
            "Archive for {}: {} bytes, sha256 {:x}",
            entry.id,
            bytes.len(),
            Sha256::digest(&bytes)
        );

        let staging = StagingArea::new(self.store);
        if let Err(e) = staging.write(&bytes) {
            return InstallOutcome::failed(InstallStage::Write, e);
        }

        if let Err(outcome) = self.validate_and_commit(&staging, &entry.id) {
            return outcome;
        }

        drop(staging);

        let local_id = match self.store.lookup_local_id(&versioned_name) {
            Ok(Some(id)) => id,
            Ok(None) => {
                return InstallOutcome::failed(
                    InstallStage::PostInstallCheck,
                    format!(
                        "Error while installing content type {}: identifier missing",
                        versioned_name
                    ),
                );
            }
            Err(e) => {
                return InstallOutcome::failed(
                    InstallStage::PostInstallCheck,
                    format!("Error while installing content type {}: {}", versioned_name, e),
                );
            }
        };

        if let Some(url) = &entry.tutorial {
            if let Err(e) = self.store.update_tutorial_url(local_id, url) {
                warn!("Could not record tutorial URL for {}: {}", versioned_name, e);
            }
        }

        info!("Installed {} as id {}", versioned_name, local_id);
        InstallOutcome::Installed { local_id }
    }

    fn validate_and_commit(
        &self,
        staging: &StagingArea<'_>,
        id: &str,
    ) -> Result<(), InstallOutcome> {
        let valid = with_elevated_capability(self.caps, self.capability, self.principal, || {
            self.store.validate(staging.upload_path(), self.principal)
        })
        .map_err(|e| InstallOutcome::failed(InstallStage::Validation, e.to_string()))?;

        if !valid {
            let reasons = self.store.drain_messages(MessageKind::Error).join(" / ");
            return Err(InstallOutcome::failed(
                InstallStage::Validation,
                format!("Not a valid package for content type {}: {}", id, reasons),
            ));
        }

        with_elevated_capability(self.caps, self.capability, self.principal, || {
            self.store.commit(self.principal)
        })
        .map_err(|e| InstallOutcome::failed(InstallStage::Commit, e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Recording fakes shared by the install and sync tests

    use crate::error::{Error, Result};
    use crate::hub::{ArchiveFetcher, CatalogEntry, PackageVersion, VersionedName};
    use crate::privilege::{CapabilityStore, Principal};
    use crate::store::{MessageBuffer, MessageKind, PackageStore};
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};

    /// Serves fixed bytes per id; unknown ids fail
    #[derive(Default)]
    pub struct FakeFetcher {
        pub archives: HashMap<String, Vec<u8>>,
        pub requests: RefCell<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn serving(id: &str, bytes: &[u8]) -> Self {
            let mut fetcher = Self::default();
            fetcher.archives.insert(id.to_string(), bytes.to_vec());
            fetcher
        }
    }

    impl ArchiveFetcher for FakeFetcher {
        fn fetch_archive(&self, id: &str) -> Result<Vec<u8>> {
            self.requests.borrow_mut().push(id.to_string());
            self.archives.get(id).cloned().ok_or_else(|| {
                Error::DownloadError(format!("Error fetching content type {}: HTTP 404", id))
            })
        }
    }

    /// Scripted store that records every call the pipeline makes
    pub struct FakeStore {
        pub staging: PathBuf,
        pub installed: HashMap<String, PackageVersion>,
        pub restricted: HashSet<String>,
        pub newer_available: bool,
        pub valid: bool,
        pub validation_errors: Vec<String>,
        pub validate_fails: bool,
        pub commit_fails: bool,
        pub local_id: Option<i64>,
        pub fail_tutorial: bool,
        pub messages: MessageBuffer,
        pub calls: RefCell<Vec<String>>,
        pub deleted: RefCell<Vec<PathBuf>>,
        pub tutorial_urls: RefCell<Vec<(i64, String)>>,
        pub principal_seen: RefCell<Option<String>>,
        /// Local-state queries, as `"installed_version {id}"` etc.
        pub lookups: RefCell<Vec<String>>,
    }

    impl FakeStore {
        pub fn new(staging: &Path) -> Self {
            Self {
                staging: staging.to_path_buf(),
                installed: HashMap::new(),
                restricted: HashSet::new(),
                newer_available: true,
                valid: true,
                validation_errors: Vec::new(),
                validate_fails: false,
                commit_fails: false,
                local_id: Some(42),
                fail_tutorial: false,
                messages: MessageBuffer::new(),
                calls: RefCell::new(Vec::new()),
                deleted: RefCell::new(Vec::new()),
                tutorial_urls: RefCell::new(Vec::new()),
                principal_seen: RefCell::new(None),
                lookups: RefCell::new(Vec::new()),
            }
        }

        pub fn with_installed(mut self, id: &str, version: PackageVersion) -> Self {
            self.installed.insert(id.to_string(), version);
            self
        }

        pub fn called(&self, name: &str) -> bool {
            self.calls.borrow().iter().any(|c| c == name)
        }

        pub fn cleaned_up(&self) -> bool {
            let deleted = self.deleted.borrow();
            deleted.contains(&self.expected_upload_path())
                && deleted.contains(&self.expected_extraction_path())
        }
    }

    impl PackageStore for FakeStore {
        fn installed_version(&self, id: &str) -> Result<Option<PackageVersion>> {
            self.lookups
                .borrow_mut()
                .push(format!("installed_version {}", id));
            Ok(self.installed.get(id).copied())
        }

        fn is_newer_available(&self, entry: &CatalogEntry) -> Result<bool> {
            self.lookups
                .borrow_mut()
                .push(format!("is_newer_available {}", entry.id));
            Ok(self.newer_available)
        }

        fn is_restricted(&self, id: &str, _major: u32, _minor: u32) -> Result<bool> {
            self.lookups.borrow_mut().push(format!("is_restricted {}", id));
            Ok(self.restricted.contains(id))
        }

        fn expected_upload_path(&self) -> PathBuf {
            self.staging.join("upload.h5p")
        }

        fn expected_extraction_path(&self) -> PathBuf {
            self.staging.join("upload")
        }

        fn validate(&self, _archive: &Path, principal: &Principal) -> Result<bool> {
            self.calls.borrow_mut().push("validate".to_string());
            *self.principal_seen.borrow_mut() = Some(principal.name().to_string());
            if self.validate_fails {
                return Err(Error::ArchiveError("validator crashed".to_string()));
            }
            for message in &self.validation_errors {
                self.messages.push(MessageKind::Error, message.clone());
            }
            self.messages.push(MessageKind::Info, "validated");
            Ok(self.valid)
        }

        fn drain_messages(&self, kind: MessageKind) -> Vec<String> {
            self.messages.drain(kind)
        }

        fn commit(&self, _principal: &Principal) -> Result<()> {
            self.calls.borrow_mut().push("commit".to_string());
            if self.commit_fails {
                return Err(Error::CommitError("disk full".to_string()));
            }
            self.messages.push(MessageKind::Info, "committed");
            Ok(())
        }

        fn lookup_local_id(&self, _name: &VersionedName) -> Result<Option<i64>> {
            self.calls.borrow_mut().push("lookup".to_string());
            Ok(self.local_id)
        }

        fn update_tutorial_url(&self, id: i64, url: &str) -> Result<()> {
            if self.fail_tutorial {
                return Err(Error::NotFoundError(format!("Package id {}", id)));
            }
            self.tutorial_urls.borrow_mut().push((id, url.to_string()));
            Ok(())
        }

        fn delete_file_tree(&self, path: &Path) -> Result<()> {
            self.deleted.borrow_mut().push(path.to_path_buf());
            let _ = std::fs::remove_file(path);
            let _ = std::fs::remove_dir_all(path);
            Ok(())
        }
    }

    /// Capability store that tracks holders and grant/revoke calls
    #[derive(Default)]
    pub struct FakeCaps {
        pub held: RefCell<HashSet<String>>,
        pub log: RefCell<Vec<String>>,
    }

    impl CapabilityStore for FakeCaps {
        fn has_capability(&self, principal: &Principal, capability: &str) -> Result<bool> {
            Ok(self
                .held
                .borrow()
                .contains(&format!("{}:{}", principal, capability)))
        }

        fn grant_capability(&self, principal: &Principal, capability: &str) -> Result<()> {
            self.log.borrow_mut().push("grant".to_string());
            self.held
                .borrow_mut()
                .insert(format!("{}:{}", principal, capability));
            Ok(())
        }

        fn revoke_capability(&self, principal: &Principal, capability: &str) -> Result<()> {
            self.log.borrow_mut().push("revoke".to_string());
            self.held
                .borrow_mut()
                .remove(&format!("{}:{}", principal, capability));
            Ok(())
        }
    }
}
