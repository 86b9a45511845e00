//! Package archive bytes plus the metadata sidecar
//!
//! The archive format itself is opaque to the pusher. Publishing metadata
//! travels in a `<archive>.meta.yaml` sidecar written at build time; when
//! the sidecar is missing, name and version fall back to the `name-version`
//! file stem so progress messages stay meaningful.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PushError;

/// Publishing metadata for a package archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PackageMeta {
    pub name: String,
    pub version: String,
    /// Restricts which host may receive this package. Absolute once set.
    pub allowed_push_host: Option<String>,
    /// Preferred host when no override is given
    pub default_server: Option<String>,
}

/// A package archive ready to upload
#[derive(Debug, Clone)]
pub struct Package {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub meta: PackageMeta,
}

impl Package {
    /// Read the archive and its metadata sidecar from disk.
    pub fn load(path: &Path) -> Result<Self, PushError> {
        let bytes = std::fs::read(path)?;

        let sidecar = sidecar_path(path);
        let mut meta: PackageMeta = if sidecar.exists() {
            serde_yaml::from_str(&std::fs::read_to_string(&sidecar)?)?
        } else {
            PackageMeta::default()
        };

        if meta.name.is_empty() {
            let (name, version) = split_stem(path);
            meta.name = name;
            if meta.version.is_empty() {
                meta.version = version;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            meta,
        })
    }

    /// "name (version)", or just the name when the version is unknown
    pub fn identity(&self) -> String {
        if self.meta.version.is_empty() {
            self.meta.name.clone()
        } else {
            format!("{} ({})", self.meta.name, self.meta.version)
        }
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".meta.yaml");
    PathBuf::from(os)
}

/// Split a `name-version` stem at the last dash that starts a version.
fn split_stem(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem.rsplit_once('-') {
        Some((name, version)) if version.chars().next().is_some_and(|c| c.is_ascii_digit()) => {
            (name.to_string(), version.to_string())
        }
        _ => (stem.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_with_sidecar() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("freewill-1.0.0.pkg");
        fs::write(&archive, b"archive bytes").unwrap();
        fs::write(
            dir.path().join("freewill-1.0.0.pkg.meta.yaml"),
            "name: freewill\nversion: 1.0.0\nallowed_push_host: https://private.example\n",
        )
        .unwrap();

        let package = Package::load(&archive).unwrap();
        assert_eq!(package.bytes, b"archive bytes");
        assert_eq!(package.meta.name, "freewill");
        assert_eq!(
            package.meta.allowed_push_host.as_deref(),
            Some("https://private.example")
        );
        assert_eq!(package.identity(), "freewill (1.0.0)");
    }

    #[test]
    fn test_load_without_sidecar_parses_stem() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("freebird-1.0.1.pkg");
        fs::write(&archive, b"x").unwrap();

        let package = Package::load(&archive).unwrap();
        assert_eq!(package.meta.name, "freebird");
        assert_eq!(package.meta.version, "1.0.1");
        assert!(package.meta.allowed_push_host.is_none());
    }

    #[test]
    fn test_stem_without_version() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("no-version-here.pkg");
        fs::write(&archive, b"x").unwrap();

        let package = Package::load(&archive).unwrap();
        // "here" is not a version; the whole stem is the name.
        assert_eq!(package.meta.name, "no-version-here");
        assert_eq!(package.identity(), "no-version-here");
    }

    #[test]
    fn test_missing_archive_is_io_error() {
        let err = Package::load(Path::new("/nonexistent/freewill-1.0.0.pkg")).unwrap_err();
        assert!(matches!(err, PushError::Io(_)));
    }
}
