// src/hub/models.rs

//! Catalog data as advertised by the content type hub
//!
//! Entries are decoded leniently: a malformed version on one entry must not
//! poison the whole catalog, so bad version data decodes to "absent" and the
//! entry is filtered out later by the compatibility checks.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Full version of a content type package
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl PackageVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Version of the host platform API (major.minor only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (major, minor) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("Invalid API version (expected MAJOR.MINOR): {}", s))?;

        let major = major
            .parse()
            .map_err(|_| format!("Invalid API major version: {}", s))?;
        let minor = minor
            .parse()
            .map_err(|_| format!("Invalid API minor version: {}", s))?;

        Ok(Self { major, minor })
    }
}

/// Minimum platform API an entry declares it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRequirement {
    Version(ApiVersion),
    /// Present in the catalog but missing or mistyped fields
    Malformed,
}

/// One package advertised by the hub catalog
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    /// Machine name, unique within one catalog response
    pub id: String,

    /// `None` when the hub sent a partial or malformed version triple
    #[serde(default, deserialize_with = "de_version_lenient")]
    pub version: Option<PackageVersion>,

    #[serde(
        default,
        rename = "coreApiVersionNeeded",
        deserialize_with = "de_api_requirement"
    )]
    pub min_api_version: Option<ApiRequirement>,

    #[serde(default)]
    pub example: Option<String>,

    #[serde(default)]
    pub tutorial: Option<String>,
}

impl CatalogEntry {
    /// Create an entry with a complete version and no optional data
    pub fn new(id: impl Into<String>, version: PackageVersion) -> Self {
        Self {
            id: id.into(),
            version: Some(version),
            min_api_version: None,
            example: None,
            tutorial: None,
        }
    }

    pub fn with_min_api(mut self, api: ApiVersion) -> Self {
        self.min_api_version = Some(ApiRequirement::Version(api));
        self
    }

    pub fn with_tutorial(mut self, url: impl Into<String>) -> Self {
        self.tutorial = Some(url.into());
        self
    }
}

/// Body of a successful catalog response
#[derive(Debug, Deserialize)]
pub struct CatalogPayload {
    #[serde(rename = "contentTypes")]
    pub content_types: Vec<CatalogEntry>,
}

/// Result of one catalog fetch: either the entries or a classified error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogResponse {
    Entries(Vec<CatalogEntry>),
    Error(String),
}

/// Name the store registers a library under, e.g. `H5P.Accordion 1.0`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedName {
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

impl VersionedName {
    pub fn new(name: impl Into<String>, major: u32, minor: u32) -> Self {
        Self {
            name: name.into(),
            major,
            minor,
        }
    }

    pub fn for_entry(id: &str, version: &PackageVersion) -> Self {
        Self::new(id, version.major, version.minor)
    }
}

impl fmt::Display for VersionedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.name, self.major, self.minor)
    }
}

fn de_version_lenient<'de, D>(deserializer: D) -> Result<Option<PackageVersion>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value::<PackageVersion>(v).ok()))
}

fn de_api_requirement<'de, D>(deserializer: D) -> Result<Option<ApiRequirement>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(match serde_json::from_value::<ApiVersion>(v) {
            Ok(api) => ApiRequirement::Version(api),
            Err(_) => ApiRequirement::Malformed,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_entry() {
        let json = r#"{
            "id": "H5P.Accordion",
            "version": {"major": 1, "minor": 0, "patch": 27},
            "coreApiVersionNeeded": {"major": 1, "minor": 24},
            "title": "Accordion",
            "example": "https://h5p.org/accordion",
            "tutorial": "https://h5p.org/tutorial-accordion"
        }"#;

        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.id, "H5P.Accordion");
        assert_eq!(entry.version, Some(PackageVersion::new(1, 0, 27)));
        assert_eq!(
            entry.min_api_version,
            Some(ApiRequirement::Version(ApiVersion::new(1, 24)))
        );
        assert_eq!(entry.example.as_deref(), Some("https://h5p.org/accordion"));
        assert_eq!(
            entry.tutorial.as_deref(),
            Some("https://h5p.org/tutorial-accordion")
        );
    }

    #[test]
    fn test_partial_version_is_absent() {
        let json = r#"{"id": "H5P.Partial", "version": {"major": 1, "minor": 2}}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.version, None);

        let json = r#"{"id": "H5P.Missing"}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.version, None);

        let json = r#"{"id": "H5P.Negative", "version": {"major": -1, "minor": 2, "patch": 0}}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.version, None);
    }

    #[test]
    fn test_api_requirement_variants() {
        let json = r#"{"id": "a", "version": {"major": 1, "minor": 0, "patch": 0}, "coreApiVersionNeeded": null}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.min_api_version, None);

        let json = r#"{"id": "a", "version": {"major": 1, "minor": 0, "patch": 0}, "coreApiVersionNeeded": {"major": 1}}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.min_api_version, Some(ApiRequirement::Malformed));
    }

    #[test]
    fn test_api_version_from_str() {
        assert_eq!("1.27".parse::<ApiVersion>().unwrap(), ApiVersion::new(1, 27));
        assert_eq!(" 2.0 ".parse::<ApiVersion>().unwrap(), ApiVersion::new(2, 0));
        assert!("1".parse::<ApiVersion>().is_err());
        assert!("1.x".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn test_versioned_name_display() {
        let name = VersionedName::for_entry("H5P.Accordion", &PackageVersion::new(1, 0, 27));
        assert_eq!(name.to_string(), "H5P.Accordion 1.0");
    }
}
