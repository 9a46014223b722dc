// src/privilege.rs

//! Scoped capability elevation
//!
//! Validation and commit need a capability the acting principal (usually the
//! unattended scheduler) may not hold. `with_elevated_capability` grants it
//! for the duration of one callback and revokes it afterwards, but only if
//! this call was the one that granted it.

use crate::error::{Error, Result};
use std::fmt;
use tracing::{debug, error};

/// Capability required to validate and commit packages
pub const MANAGE_LIBRARIES: &str = "manage_libraries";

/// Principal used for unattended sync runs
pub const DEFAULT_PRINCIPAL: &str = "scheduler";

/// The identity an operation runs as
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for Principal {
    fn default() -> Self {
        Self::new(DEFAULT_PRINCIPAL)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for per-principal capabilities
pub trait CapabilityStore {
    fn has_capability(&self, principal: &Principal, capability: &str) -> Result<bool>;

    /// Grant for the length of one operation. Stores that persist grants
    /// must not let one outlive the process that made it.
    fn grant_capability(&self, principal: &Principal, capability: &str) -> Result<()>;

    fn revoke_capability(&self, principal: &Principal, capability: &str) -> Result<()>;
}

/// Holds a temporary grant; revokes it on `release` or when dropped
pub struct ElevationGuard<'a> {
    caps: &'a dyn CapabilityStore,
    principal: &'a Principal,
    capability: &'a str,
    granted: bool,
}

impl<'a> ElevationGuard<'a> {
    /// Grant `capability` unless `principal` already holds it
    pub fn acquire(
        caps: &'a dyn CapabilityStore,
        principal: &'a Principal,
        capability: &'a str,
    ) -> Result<Self> {
        let already_held = caps.has_capability(principal, capability)?;
        if !already_held {
            debug!("Granting {} to {} temporarily", capability, principal);
            caps.grant_capability(principal, capability)?;
        }

        Ok(Self {
            caps,
            principal,
            capability,
            granted: !already_held,
        })
    }

    /// Revoke the grant now, reporting failure to the caller
    pub fn release(mut self) -> Result<()> {
        self.revoke()
    }

    fn revoke(&mut self) -> Result<()> {
        if !self.granted {
            return Ok(());
        }
        self.granted = false;
        debug!("Revoking temporary {} from {}", self.capability, self.principal);
        self.caps.revoke_capability(self.principal, self.capability)
    }
}

impl Drop for ElevationGuard<'_> {
    /// Covers unwinding out of the callback; the normal path calls `release`.
    fn drop(&mut self) {
        if let Err(e) = self.revoke() {
            error!(
                "Failed to revoke {} from {}: {}",
                self.capability, self.principal, e
            );
        }
    }
}

/// Run `callback` while `principal` holds `capability`.
///
/// The callback's result is returned unchanged. A failed revoke is logged
/// and does not replace it. If the capability cannot be checked or granted
/// the callback is not run.
pub fn with_elevated_capability<T, F>(
    caps: &dyn CapabilityStore,
    capability: &str,
    principal: &Principal,
    callback: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let guard = ElevationGuard::acquire(caps, principal, capability).map_err(|e| {
        error!("Could not grant {} to {}: {}", capability, principal, e);
        Error::PermissionDenied {
            principal: principal.to_string(),
            capability: capability.to_string(),
        }
    })?;

    let result = callback();

    if let Err(e) = guard.release() {
        error!(
            "Failed to revoke {} from {}: {}",
            capability, principal, e
        );
    }

    result
}
