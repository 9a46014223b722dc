// src/compat.rs

//! Eligibility checks for catalog entries
//!
//! Pure functions only. Everything that needs the package store (restriction
//! policy, installed version, the store's own "newer patch" predicate) is
//! looked up by the caller and passed in as `LocalState`.

use crate::hub::{ApiRequirement, ApiVersion, CatalogEntry, PackageVersion};

/// What the local store knows about an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalState {
    /// Policy flag for this id + major.minor
    pub restricted: bool,
    /// Highest locally installed version, if any
    pub installed: Option<PackageVersion>,
    /// The store's verdict on whether the entry is a newer patch
    pub newer_available: bool,
}

/// Why an entry will or will not be installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Install,
    Restricted,
    MissingVersion,
    IncompatibleApi,
    /// Only upgrades are applied; packages never installed locally are skipped
    NotInstalled,
    UpToDate,
}

impl Eligibility {
    pub fn as_str(&self) -> &str {
        match self {
            Eligibility::Install => "install",
            Eligibility::Restricted => "restricted by policy",
            Eligibility::MissingVersion => "no complete version in catalog",
            Eligibility::IncompatibleApi => "requires a newer platform API",
            Eligibility::NotInstalled => "not installed locally",
            Eligibility::UpToDate => "already up to date",
        }
    }
}

/// True when the platform satisfies `required`.
///
/// An entry is incompatible if it needs a strictly greater major, or the same
/// major with a strictly greater minor.
pub fn is_api_compatible(required: Option<ApiRequirement>, platform: ApiVersion) -> bool {
    match required {
        None => true,
        Some(ApiRequirement::Malformed) => false,
        Some(ApiRequirement::Version(required)) => {
            let major_newer = required.major > platform.major;
            let minor_newer = required.major == platform.major && required.minor > platform.minor;
            !(major_newer || minor_newer)
        }
    }
}

/// Classify an entry against local state
pub fn evaluate(entry: &CatalogEntry, platform: ApiVersion, local: &LocalState) -> Eligibility {
    if local.restricted {
        return Eligibility::Restricted;
    }

    if entry.version.is_none() {
        return Eligibility::MissingVersion;
    }

    if !is_api_compatible(entry.min_api_version, platform) {
        return Eligibility::IncompatibleApi;
    }

    if local.installed.is_none() {
        return Eligibility::NotInstalled;
    }

    if !local.newer_available {
        return Eligibility::UpToDate;
    }

    Eligibility::Install
}

/// Whether the sync should run an install transaction for `entry`
pub fn should_install(entry: &CatalogEntry, platform: ApiVersion, local: &LocalState) -> bool {
    evaluate(entry, platform, local) == Eligibility::Install
}
