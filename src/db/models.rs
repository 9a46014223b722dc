// src/db/models.rs

//! Data models for hubsync database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::Result;
use crate::hub::PackageVersion;
use rusqlite::{Connection, OptionalExtension, Row, params};

const PACKAGE_COLUMNS: &str =
    "id, name, major_version, minor_version, patch_version, restricted, tutorial_url, installed_at";

/// A locally installed content type library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub id: Option<i64>,
    pub name: String,
    pub version: PackageVersion,
    /// Set by an administrator; sync never changes it
    pub restricted: bool,
    pub tutorial_url: Option<String>,
    pub installed_at: Option<String>,
}

impl InstalledPackage {
    /// Insert a library or bump the patch of the existing major.minor row.
    ///
    /// `restricted` and `tutorial_url` of an existing row are preserved.
    pub fn upsert_version(conn: &Connection, name: &str, version: PackageVersion) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (name, major_version, minor_version, patch_version)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name, major_version, minor_version)
             DO UPDATE SET patch_version = excluded.patch_version,
                           installed_at = CURRENT_TIMESTAMP",
            params![name, version.major, version.minor, version.patch],
        )?;

        let id = conn.query_row(
            "SELECT id FROM packages WHERE name = ?1 AND major_version = ?2 AND minor_version = ?3",
            params![name, version.major, version.minor],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Find a package by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE id = ?1",
            PACKAGE_COLUMNS
        ))?;

        let package = stmt.query_row([id], Self::from_row).optional()?;

        Ok(package)
    }

    /// Find all installed versions of a package, newest first
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE name = ?1
             ORDER BY major_version DESC, minor_version DESC, patch_version DESC",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Find the library registered under `name` + `major.minor`
    pub fn find_by_versioned_name(
        conn: &Connection,
        name: &str,
        major: u32,
        minor: u32,
    ) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE name = ?1 AND major_version = ?2 AND minor_version = ?3",
            PACKAGE_COLUMNS
        ))?;

        let package = stmt
            .query_row(params![name, major, minor], Self::from_row)
            .optional()?;

        Ok(package)
    }

    /// List all packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY name, major_version, minor_version",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Set or clear the restriction flag; returns false if no row matched
    pub fn set_restricted(
        conn: &Connection,
        name: &str,
        major: u32,
        minor: u32,
        restricted: bool,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE packages SET restricted = ?1
             WHERE name = ?2 AND major_version = ?3 AND minor_version = ?4",
            params![restricted, name, major, minor],
        )?;
        Ok(changed > 0)
    }

    /// Record the tutorial URL advertised by the hub
    pub fn update_tutorial_url(conn: &Connection, id: i64, url: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE packages SET tutorial_url = ?1 WHERE id = ?2",
            params![url, id],
        )?;
        Ok(changed > 0)
    }

    /// Convert a database row to an InstalledPackage
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            version: PackageVersion::new(row.get(2)?, row.get(3)?, row.get(4)?),
            restricted: row.get(5)?,
            tutorial_url: row.get(6)?,
            installed_at: row.get(7)?,
        })
    }
}

/// Access to the key/value `settings` table
pub struct Setting;

impl Setting {
    /// Read a setting's value
    pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Create or replace a setting
    pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            params![key, value],
        )?;
        Ok(())
    }
}

/// A capability held by a principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityGrant {
    pub principal: String,
    pub capability: String,
    /// Granted for the length of one operation; never meant to outlive it
    pub temporary: bool,
}

impl CapabilityGrant {
    pub fn new(principal: String, capability: String, temporary: bool) -> Self {
        Self {
            principal,
            capability,
            temporary,
        }
    }

    pub fn exists(conn: &Connection, principal: &str, capability: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM capabilities WHERE principal = ?1 AND capability = ?2",
                params![principal, capability],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert this grant; an existing grant is left as it is
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO capabilities (principal, capability, temporary)
             VALUES (?1, ?2, ?3)",
            params![&self.principal, &self.capability, self.temporary],
        )?;
        Ok(())
    }

    pub fn delete(conn: &Connection, principal: &str, capability: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM capabilities WHERE principal = ?1 AND capability = ?2",
            params![principal, capability],
        )?;
        Ok(())
    }

    /// Drop every temporary grant; returns how many were removed
    pub fn clear_temporary(conn: &Connection) -> Result<usize> {
        let removed = conn.execute("DELETE FROM capabilities WHERE temporary = 1", [])?;
        Ok(removed)
    }
}
