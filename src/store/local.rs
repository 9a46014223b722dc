// src/store/local.rs

//! SQLite + filesystem package store
//!
//! Layout under the store root:
//! - `hubsync.db`: package records, settings, capability grants
//! - `staging/upload.h5p`: where the pipeline writes a downloaded archive
//! - `staging/upload/`: where validation unpacks it
//! - `libraries/{machineName}-{major}.{minor}/`: installed library files

use crate::db::{
    self,
    models::{CapabilityGrant, InstalledPackage},
};
use crate::error::{Error, Result};
use crate::hub::{CatalogEntry, PackageVersion, VersionedName};
use crate::privilege::{CapabilityStore, MANAGE_LIBRARIES, Principal};
use crate::store::archive::{self, ExtractedLibrary};
use crate::store::{MessageBuffer, MessageKind, PackageStore};
use rusqlite::{Connection, OptionalExtension, params};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// Database file name under the store root
pub const DB_FILE: &str = "hubsync.db";

const STAGING_DIR: &str = "staging";
const LIBRARIES_DIR: &str = "libraries";
const UPLOAD_FILE: &str = "upload.h5p";
const EXTRACTION_DIR: &str = "upload";

/// Name of the replaced library inside its backup directory
const PREVIOUS_FILES: &str = "previous";

/// Local package store rooted at one directory
pub struct LocalStore {
    conn: Connection,
    root: PathBuf,
    messages: MessageBuffer,
    /// Libraries accepted by the last successful `validate`
    validated: RefCell<Vec<ExtractedLibrary>>,
    /// `mainLibrary` of the last validated package
    main_library: RefCell<Option<String>>,
}

impl LocalStore {
    /// Open (creating if needed) the store at `root`
    pub fn open(root: &Path) -> Result<Self> {
        for dir in [root.join(STAGING_DIR), root.join(LIBRARIES_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| {
                Error::InitError(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let db_path = root.join(DB_FILE);
        let db_path = db_path.to_str().ok_or_else(|| {
            Error::InitError(format!("Non UTF-8 store path: {}", db_path.display()))
        })?;
        db::init(db_path)?;
        let conn = db::open(db_path)?;

        let stale = CapabilityGrant::clear_temporary(&conn)?;
        if stale > 0 {
            warn!(
                "Revoked {} temporary capability grant(s) left by an interrupted run",
                stale
            );
        }

        debug!("Opened package store at {}", root.display());
        Ok(Self {
            conn,
            root: root.to_path_buf(),
            messages: MessageBuffer::new(),
            validated: RefCell::new(Vec::new()),
            main_library: RefCell::new(None),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join(LIBRARIES_DIR)
    }

    pub fn list_installed(&self) -> Result<Vec<InstalledPackage>> {
        InstalledPackage::list_all(&self.conn)
    }

    /// Set the administrator restriction flag on an installed library
    pub fn set_restricted(
        &self,
        name: &str,
        major: u32,
        minor: u32,
        restricted: bool,
    ) -> Result<()> {
        if !InstalledPackage::set_restricted(&self.conn, name, major, minor, restricted)? {
            return Err(Error::NotFoundError(format!(
                "Package {} is not installed",
                VersionedName::new(name, major, minor)
            )));
        }
        info!(
            "{} {}",
            VersionedName::new(name, major, minor),
            if restricted { "restricted" } else { "unrestricted" }
        );
        Ok(())
    }

    fn may_manage_libraries(&self, principal: &Principal) -> Result<bool> {
        self.has_capability(principal, MANAGE_LIBRARIES)
    }

    /// Drop bundled libraries that must not replace what is installed.
    ///
    /// A library is kept only when its major.minor is not installed yet or
    /// the package ships a higher patch. Restricted libraries are left alone
    /// unless they are the package's own main library.
    fn select_for_commit(
        &self,
        libraries: Vec<ExtractedLibrary>,
        main_library: Option<&str>,
    ) -> Result<Vec<ExtractedLibrary>> {
        let mut selected = Vec::with_capacity(libraries.len());

        for library in libraries {
            let manifest = &library.manifest;
            let installed = InstalledPackage::find_by_versioned_name(
                &self.conn,
                &manifest.machine_name,
                manifest.major_version,
                manifest.minor_version,
            )?;

            if let Some(installed) = installed {
                let is_main = main_library == Some(manifest.machine_name.as_str());
                if installed.restricted && !is_main {
                    self.messages.push(
                        MessageKind::Info,
                        format!("Kept {}: restricted", manifest.versioned_name()),
                    );
                    continue;
                }
                if installed.version.patch >= manifest.patch_version {
                    self.messages.push(
                        MessageKind::Info,
                        format!(
                            "Kept {} ({}): package ships {}",
                            manifest.versioned_name(),
                            installed.version,
                            manifest.version()
                        ),
                    );
                    continue;
                }
            }

            selected.push(library);
        }

        Ok(selected)
    }
}

/// An installed library directory replaced by a freshly staged copy
struct SwappedLibrary {
    target: PathBuf,
    /// Holds the replaced files until the swap is final
    backup: Option<TempDir>,
}

impl SwappedLibrary {
    /// Move `staged` over `target`, keeping the old files aside
    fn swap_in(libraries_dir: &Path, staged: TempDir, target: PathBuf) -> Result<Self> {
        let backup = if target.exists() {
            let backup = tempfile::Builder::new()
                .prefix(".previous-")
                .tempdir_in(libraries_dir)?;
            fs::rename(&target, backup.path().join(PREVIOUS_FILES)).map_err(|e| {
                Error::IoError(format!("Failed to move aside {}: {}", target.display(), e))
            })?;
            Some(backup)
        } else {
            None
        };

        // The emptied staging directory is removed when `staged` drops
        if let Err(e) = fs::rename(staged.path(), &target) {
            let swap = Self { target, backup };
            let message = format!("Failed to install {}: {}", swap.target.display(), e);
            swap.restore();
            return Err(Error::IoError(message));
        }

        Ok(Self { target, backup })
    }

    /// Put the replaced files back
    fn restore(self) {
        if self.target.exists() {
            if let Err(e) = fs::remove_dir_all(&self.target) {
                warn!("Failed to remove {}: {}", self.target.display(), e);
            }
        }
        if let Some(backup) = &self.backup {
            if let Err(e) = fs::rename(backup.path().join(PREVIOUS_FILES), &self.target) {
                error!("Failed to restore {}: {}", self.target.display(), e);
            }
        }
    }
}

fn restore_all(swapped: Vec<SwappedLibrary>) {
    for swap in swapped.into_iter().rev() {
        swap.restore();
    }
}

impl PackageStore for LocalStore {
    fn installed_version(&self, id: &str) -> Result<Option<PackageVersion>> {
        Ok(InstalledPackage::find_by_name(&self.conn, id)?
            .first()
            .map(|p| p.version))
    }

    fn is_newer_available(&self, entry: &CatalogEntry) -> Result<bool> {
        let Some(version) = entry.version else {
            return Ok(false);
        };

        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM packages
                 WHERE name = ?1 AND major_version = ?2 AND minor_version = ?3
                   AND patch_version < ?4",
                params![&entry.id, version.major, version.minor, version.patch],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }

    fn is_restricted(&self, id: &str, major: u32, minor: u32) -> Result<bool> {
        Ok(InstalledPackage::find_by_versioned_name(&self.conn, id, major, minor)?
            .map(|p| p.restricted)
            .unwrap_or(false))
    }

    fn expected_upload_path(&self) -> PathBuf {
        self.root.join(STAGING_DIR).join(UPLOAD_FILE)
    }

    fn expected_extraction_path(&self) -> PathBuf {
        self.root.join(STAGING_DIR).join(EXTRACTION_DIR)
    }

    fn validate(&self, archive_path: &Path, principal: &Principal) -> Result<bool> {
        self.validated.borrow_mut().clear();
        self.main_library.borrow_mut().take();

        if !self.may_manage_libraries(principal)? {
            self.messages.push(
                MessageKind::Error,
                format!("{} is not allowed to install libraries", principal),
            );
            return Ok(false);
        }

        let extraction = self.expected_extraction_path();
        self.delete_file_tree(&extraction)?;

        if let Err(e) = archive::extract(archive_path, &extraction) {
            self.messages.push(MessageKind::Error, e.to_string());
            return Ok(false);
        }

        let main_library = match archive::main_library(&extraction) {
            Ok(main_library) => main_library,
            Err(e) => {
                self.messages.push(MessageKind::Error, e.to_string());
                return Ok(false);
            }
        };

        let (libraries, problems) = archive::scan_libraries(&extraction);
        let valid = problems.is_empty() && !libraries.is_empty();

        for problem in problems {
            self.messages.push(MessageKind::Error, problem);
        }
        if libraries.is_empty() {
            self.messages
                .push(MessageKind::Error, "Package contains no libraries");
        }

        if valid {
            self.messages.push(
                MessageKind::Info,
                format!("Package contains {} libraries", libraries.len()),
            );
            *self.validated.borrow_mut() = libraries;
            *self.main_library.borrow_mut() = main_library;
        }

        Ok(valid)
    }

    fn drain_messages(&self, kind: MessageKind) -> Vec<String> {
        self.messages.drain(kind)
    }

    fn commit(&self, principal: &Principal) -> Result<()> {
        if !self.may_manage_libraries(principal)? {
            return Err(Error::PermissionDenied {
                principal: principal.to_string(),
                capability: MANAGE_LIBRARIES.to_string(),
            });
        }

        let libraries = std::mem::take(&mut *self.validated.borrow_mut());
        let main_library = self.main_library.borrow_mut().take();
        if libraries.is_empty() {
            return Err(Error::CommitError(
                "No validated package to commit".to_string(),
            ));
        }

        let libraries = self.select_for_commit(libraries, main_library.as_deref())?;
        if libraries.is_empty() {
            debug!("Every bundled library is already current");
            return Ok(());
        }

        // Copy everything first; installed files are untouched until every
        // copy has succeeded.
        let libraries_dir = self.libraries_dir();
        let mut staged = Vec::with_capacity(libraries.len());
        for library in &libraries {
            let dir = tempfile::Builder::new()
                .prefix(".staging-")
                .tempdir_in(&libraries_dir)?;
            archive::copy_tree(&library.dir, dir.path())?;
            staged.push((libraries_dir.join(library.manifest.dir_name()), dir));
        }

        let mut swapped = Vec::with_capacity(staged.len());
        for (target, dir) in staged {
            match SwappedLibrary::swap_in(&libraries_dir, dir, target) {
                Ok(swap) => swapped.push(swap),
                Err(e) => {
                    restore_all(swapped);
                    return Err(e);
                }
            }
        }

        let registered = db::transaction(&self.conn, |tx| {
            for library in &libraries {
                let id = InstalledPackage::upsert_version(
                    tx,
                    &library.manifest.machine_name,
                    library.manifest.version(),
                )?;
                debug!("Registered {} as id {}", library.manifest.versioned_name(), id);
            }
            Ok(())
        });
        if let Err(e) = registered {
            restore_all(swapped);
            return Err(Error::CommitError(format!(
                "Failed to register libraries: {}",
                e
            )));
        }
        // Dropping the backups removes the replaced files
        drop(swapped);

        for library in &libraries {
            self.messages.push(
                MessageKind::Info,
                format!(
                    "Installed {} ({})",
                    library.manifest.versioned_name(),
                    library.manifest.version()
                ),
            );
        }
        Ok(())
    }

    fn lookup_local_id(&self, name: &VersionedName) -> Result<Option<i64>> {
        let package = InstalledPackage::find_by_versioned_name(
            &self.conn,
            &name.name,
            name.major,
            name.minor,
        )?;
        Ok(package.and_then(|p| p.id))
    }

    fn update_tutorial_url(&self, id: i64, url: &str) -> Result<()> {
        if !InstalledPackage::update_tutorial_url(&self.conn, id, url)? {
            return Err(Error::NotFoundError(format!("Package id {}", id)));
        }
        Ok(())
    }
}

impl CapabilityStore for LocalStore {
    fn has_capability(&self, principal: &Principal, capability: &str) -> Result<bool> {
        CapabilityGrant::exists(&self.conn, principal.name(), capability)
    }

    fn grant_capability(&self, principal: &Principal, capability: &str) -> Result<()> {
        CapabilityGrant::new(principal.name().to_string(), capability.to_string(), true)
            .insert(&self.conn)
    }

    fn revoke_capability(&self, principal: &Principal, capability: &str) -> Result<()> {
        CapabilityGrant::delete(&self.conn, principal.name(), capability)
    }
}
