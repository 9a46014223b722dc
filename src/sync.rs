// src/sync.rs

//! One reconciliation pass against the hub catalog

use crate::compat::{self, Eligibility, LocalState};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::hub::{ArchiveFetcher, CatalogEntry, CatalogResponse, CatalogSource};
use crate::install::{InstallOutcome, InstallStage, Installer};
use crate::privilege::CapabilityStore;
use crate::store::PackageStore;
use tracing::{debug, error, info, warn};

/// An entry whose install transaction ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledEntry {
    pub id: String,
    pub local_id: i64,
}

/// An entry that could not be evaluated or installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub id: String,
    /// `None` when looking up local state failed before any install stage
    pub stage: Option<InstallStage>,
    pub message: String,
}

/// Summary of a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub catalog_error: Option<String>,
    pub installed: Vec<InstalledEntry>,
    pub skipped: Vec<(String, Eligibility)>,
    pub failed: Vec<FailedEntry>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.catalog_error.is_none() && self.failed.is_empty()
    }
}

pub struct SyncOrchestrator<'a> {
    config: &'a SyncConfig,
    catalog: &'a dyn CatalogSource,
    fetcher: &'a dyn ArchiveFetcher,
    store: &'a dyn PackageStore,
    caps: &'a dyn CapabilityStore,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        config: &'a SyncConfig,
        catalog: &'a dyn CatalogSource,
        fetcher: &'a dyn ArchiveFetcher,
        store: &'a dyn PackageStore,
        caps: &'a dyn CapabilityStore,
    ) -> Self {
        Self {
            config,
            catalog,
            fetcher,
            store,
            caps,
        }
    }

    /// Fetch the catalog and install every eligible entry, in catalog order.
    ///
    /// A failing entry is logged and recorded; the remaining entries are
    /// still processed.
    pub fn run_sync(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let entries = match self.catalog.fetch_catalog() {
            CatalogResponse::Entries(entries) => entries,
            CatalogResponse::Error(message) => {
                error!("{}", message);
                report.catalog_error = Some(message);
                return report;
            }
        };

        info!(
            "Evaluating {} catalog entries against platform API {}",
            entries.len(),
            self.config.platform_api
        );

        let installer = Installer::new(
            self.fetcher,
            self.store,
            self.caps,
            &self.config.principal,
            &self.config.capability,
        );

        for entry in &entries {
            let local = match self.local_state(entry) {
                Ok(local) => local,
                Err(e) => {
                    warn!("Skipping {}: could not read local state: {}", entry.id, e);
                    report.failed.push(FailedEntry {
                        id: entry.id.clone(),
                        stage: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let eligibility = compat::evaluate(entry, self.config.platform_api, &local);
            if eligibility != Eligibility::Install {
                debug!("Skipping {}: {}", entry.id, eligibility.as_str());
                report.skipped.push((entry.id.clone(), eligibility));
                continue;
            }

            match installer.install_package(entry) {
                InstallOutcome::Installed { local_id } => {
                    report.installed.push(InstalledEntry {
                        id: entry.id.clone(),
                        local_id,
                    });
                }
                InstallOutcome::Failed { stage, message } => {
                    error!("Failed to install {} at {} stage: {}", entry.id, stage, message);
                    report.failed.push(FailedEntry {
                        id: entry.id.clone(),
                        stage: Some(stage),
                        message,
                    });
                }
            }
        }

        info!(
            "Sync finished: {} installed, {} skipped, {} failed",
            report.installed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    fn local_state(&self, entry: &CatalogEntry) -> Result<LocalState> {
        // Restriction is keyed by major.minor; without a version there is
        // nothing to look up.
        let restricted = match entry.version {
            Some(version) => self
                .store
                .is_restricted(&entry.id, version.major, version.minor)?,
            None => false,
        };

        // Restriction decides the outcome on its own
        if restricted {
            return Ok(LocalState {
                restricted,
                ..LocalState::default()
            });
        }

        Ok(LocalState {
            restricted,
            installed: self.store.installed_version(&entry.id)?,
            newer_available: self.store.is_newer_available(entry)?,
        })
    }
}
