// src/store/archive.rs

//! Package archive handling
//!
//! A content type archive is a ZIP file whose top-level directories are
//! libraries named `{machineName}-{major}.{minor}`, each carrying a
//! `library.json` manifest. Other top-level entries (`h5p.json`, `content/`)
//! are ignored here.

use crate::error::{Error, Result};
use crate::hub::{PackageVersion, VersionedName};
use serde::Deserialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Manifest file every library directory must contain
pub const LIBRARY_MANIFEST: &str = "library.json";

/// Package-level manifest at the archive root
pub const PACKAGE_MANIFEST: &str = "h5p.json";

/// The fields of `library.json` the store relies on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryManifest {
    pub machine_name: String,
    pub major_version: u32,
    pub minor_version: u32,
    pub patch_version: u32,
    #[serde(default)]
    pub title: Option<String>,
}

impl LibraryManifest {
    pub fn version(&self) -> PackageVersion {
        PackageVersion::new(self.major_version, self.minor_version, self.patch_version)
    }

    pub fn versioned_name(&self) -> VersionedName {
        VersionedName::new(&self.machine_name, self.major_version, self.minor_version)
    }

    /// Directory name the library must be shipped and installed under
    pub fn dir_name(&self) -> String {
        format!(
            "{}-{}.{}",
            self.machine_name, self.major_version, self.minor_version
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageManifest {
    #[serde(default)]
    main_library: Option<String>,
}

/// A library found in an extracted archive
#[derive(Debug, Clone)]
pub struct ExtractedLibrary {
    pub dir: PathBuf,
    pub manifest: LibraryManifest,
}

/// Unpack `archive` into `dest`
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| {
        Error::ArchiveError(format!("Failed to open {}: {}", archive.display(), e))
    })?;

    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::ArchiveError(format!("Not a valid package archive: {}", e)))?;

    fs::create_dir_all(dest)?;
    zip.extract(dest)
        .map_err(|e| Error::ArchiveError(format!("Failed to extract package: {}", e)))?;

    debug!("Extracted {} entries to {}", zip.len(), dest.display());
    Ok(())
}

/// Find library directories under `root`.
///
/// Returns the libraries that passed and a message per problem found.
pub fn scan_libraries(root: &Path) -> (Vec<ExtractedLibrary>, Vec<String>) {
    let mut libraries = Vec::new();
    let mut problems = Vec::new();

    let dirs = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter();

    for entry in dirs {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                problems.push(format!("Unable to read extracted package: {}", e));
                continue;
            }
        };

        if !entry.file_type().is_dir() {
            continue;
        }

        let manifest_path = entry.path().join(LIBRARY_MANIFEST);
        if !manifest_path.is_file() {
            continue;
        }

        let dir_name = entry.file_name().to_string_lossy().to_string();
        match read_manifest(&manifest_path) {
            Ok(manifest) => {
                if manifest.machine_name.trim().is_empty() {
                    problems.push(format!("Library in {} has an empty machineName", dir_name));
                } else if manifest.dir_name() != dir_name {
                    problems.push(format!(
                        "Library directory {} does not match {}",
                        dir_name,
                        manifest.dir_name()
                    ));
                } else {
                    libraries.push(ExtractedLibrary {
                        dir: entry.path().to_path_buf(),
                        manifest,
                    });
                }
            }
            Err(e) => problems.push(format!("Invalid {} in {}: {}", LIBRARY_MANIFEST, dir_name, e)),
        }
    }

    (libraries, problems)
}

/// Machine name of the package's own library, as declared in `h5p.json`.
///
/// Every other library in the archive is a bundled dependency. A package
/// without `h5p.json` or without `mainLibrary` declares none.
pub fn main_library(root: &Path) -> Result<Option<String>> {
    let path = root.join(PACKAGE_MANIFEST);
    if !path.is_file() {
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)?;
    let manifest: PackageManifest = serde_json::from_str(&raw)
        .map_err(|e| Error::ParseError(format!("Invalid {}: {}", PACKAGE_MANIFEST, e)))?;
    Ok(manifest.main_library)
}

fn read_manifest(path: &Path) -> Result<LibraryManifest> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| Error::ParseError(e.to_string()))
}

/// Recursively copy `src` to `dest`, creating directories as needed
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry
            .map_err(|e| Error::IoError(format!("Failed to walk {}: {}", src.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).map_err(|e| {
                Error::IoError(format!(
                    "Failed to copy {} to {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// Build package archives for tests
#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    /// Library manifest JSON for `name` at `major.minor.patch`
    pub fn manifest_json(name: &str, major: u32, minor: u32, patch: u32) -> String {
        format!(
            concat!(
                r#"{{"title": "{name}", "machineName": "{name}", "#,
                r#""majorVersion": {major}, "minorVersion": {minor}, "#,
                r#""patchVersion": {patch}, "runnable": 1}}"#
            ),
            name = name,
            major = major,
            minor = minor,
            patch = patch
        )
    }

    /// ZIP bytes containing the given (path, contents) pairs
    pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, contents) in files {
            writer.start_file(*path, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// A well-formed single-library package
    pub fn library_package(name: &str, major: u32, minor: u32, patch: u32) -> Vec<u8> {
        bundle_package(name, &[(name, major, minor, patch)])
    }

    /// A package whose main library is `main`, shipping every `(name, major,
    /// minor, patch)` library given, dependencies included
    pub fn bundle_package(main: &str, libraries: &[(&str, u32, u32, u32)]) -> Vec<u8> {
        let mut files = vec![(
            "h5p.json".to_string(),
            format!(r#"{{"title": "hub package", "mainLibrary": "{}"}}"#, main),
        )];
        for &(name, major, minor, patch) in libraries {
            let dir = format!("{}-{}.{}", name, major, minor);
            files.push((
                format!("{}/library.json", dir),
                manifest_json(name, major, minor, patch),
            ));
            files.push((
                format!("{}/scripts/main.js", dir),
                format!("// {} patch {}", name, patch),
            ));
        }

        let borrowed: Vec<(&str, &str)> = files
            .iter()
            .map(|(path, contents)| (path.as_str(), contents.as_str()))
            .collect();
        zip_bytes(&borrowed)
    }
}
