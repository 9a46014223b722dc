// src/config.rs

//! Sync settings stored in the `settings` table
//!
//! Settings are loaded once into a [`SyncConfig`] and handed to the
//! orchestrator; nothing reads the table behind its back.

use crate::db::models::Setting;
use crate::error::{Error, Result};
use crate::hub::ApiVersion;
use crate::privilege::{DEFAULT_PRINCIPAL, MANAGE_LIBRARIES, Principal};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_ENDPOINT_BASE: &str = "api.h5p.org/v1";
pub const DEFAULT_PLATFORM_API: ApiVersion = ApiVersion { major: 1, minor: 27 };

pub const KEY_ENDPOINT: &str = "endpoint_url_base";
pub const KEY_SCHEDULE: &str = "update_schedule";
pub const KEY_PLATFORM_API: &str = "platform_api";
pub const KEY_PRINCIPAL: &str = "principal";
pub const KEY_LAST_SYNC: &str = "last_sync";

/// How often a scheduled sync is due
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateSchedule {
    #[default]
    Never,
    Daily,
    Weekly,
}

impl UpdateSchedule {
    pub fn as_str(&self) -> &str {
        match self {
            UpdateSchedule::Never => "never",
            UpdateSchedule::Daily => "daily",
            UpdateSchedule::Weekly => "weekly",
        }
    }

    /// Minimum time between scheduled runs; `None` for `Never`
    pub fn interval(&self) -> Option<Duration> {
        match self {
            UpdateSchedule::Never => None,
            UpdateSchedule::Daily => Some(Duration::hours(24)),
            UpdateSchedule::Weekly => Some(Duration::days(7)),
        }
    }
}

impl fmt::Display for UpdateSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(UpdateSchedule::Never),
            "daily" => Ok(UpdateSchedule::Daily),
            "weekly" => Ok(UpdateSchedule::Weekly),
            other => Err(Error::ConfigError(format!(
                "Unknown update schedule '{}' (expected never, daily or weekly)",
                other
            ))),
        }
    }
}

/// Everything a sync run needs to know about its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub endpoint_base: String,
    pub platform_api: ApiVersion,
    pub principal: Principal,
    pub capability: String,
    pub schedule: UpdateSchedule,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint_base: DEFAULT_ENDPOINT_BASE.to_string(),
            platform_api: DEFAULT_PLATFORM_API,
            principal: Principal::new(DEFAULT_PRINCIPAL),
            capability: MANAGE_LIBRARIES.to_string(),
            schedule: UpdateSchedule::Never,
        }
    }
}

impl SyncConfig {
    /// Load settings, falling back to defaults for missing or unusable values
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut config = Self::default();

        if let Some(endpoint) = Setting::get(conn, KEY_ENDPOINT)? {
            config.endpoint_base = sanitize_endpoint_base(&endpoint);
        }

        if let Some(schedule) = Setting::get(conn, KEY_SCHEDULE)? {
            match schedule.parse() {
                Ok(schedule) => config.schedule = schedule,
                Err(e) => warn!("Ignoring stored {}: {}", KEY_SCHEDULE, e),
            }
        }

        if let Some(api) = Setting::get(conn, KEY_PLATFORM_API)? {
            match api.parse::<ApiVersion>() {
                Ok(api) => config.platform_api = api,
                Err(e) => warn!("Ignoring stored {} '{}': {}", KEY_PLATFORM_API, api, e),
            }
        }

        if let Some(principal) = Setting::get(conn, KEY_PRINCIPAL)? {
            let principal = principal.trim();
            if !principal.is_empty() {
                config.principal = Principal::new(principal);
            }
        }

        Ok(config)
    }

    /// Persist every setting this config carries
    pub fn save(&self, conn: &Connection) -> Result<()> {
        Setting::set(conn, KEY_ENDPOINT, &sanitize_endpoint_base(&self.endpoint_base))?;
        Setting::set(conn, KEY_SCHEDULE, self.schedule.as_str())?;
        Setting::set(conn, KEY_PLATFORM_API, &self.platform_api.to_string())?;
        Setting::set(conn, KEY_PRINCIPAL, self.principal.name())?;
        Ok(())
    }
}

/// Trim whitespace and trailing slashes; an empty value means the default
pub fn sanitize_endpoint_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_ENDPOINT_BASE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether a scheduled run is due given the last recorded sync
pub fn needs_sync(schedule: UpdateSchedule, last_sync: Option<&str>) -> bool {
    needs_sync_at(schedule, last_sync, Utc::now())
}

fn needs_sync_at(schedule: UpdateSchedule, last_sync: Option<&str>, now: DateTime<Utc>) -> bool {
    let Some(interval) = schedule.interval() else {
        return false;
    };

    match last_sync.map(parse_timestamp) {
        None => true,
        Some(Ok(last)) => now - last >= interval,
        // Unreadable timestamp, force sync
        Some(Err(_)) => true,
    }
}

/// Read the last sync timestamp, if one was recorded
pub fn last_sync(conn: &Connection) -> Result<Option<String>> {
    Setting::get(conn, KEY_LAST_SYNC)
}

/// Stamp the current time as the last sync
pub fn record_last_sync(conn: &Connection) -> Result<String> {
    let now = current_timestamp();
    Setting::set(conn, KEY_LAST_SYNC, &now)?;
    Ok(now)
}

/// Current time as an RFC 3339 string
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::ParseError(format!("Invalid timestamp: {}", e)))
}
