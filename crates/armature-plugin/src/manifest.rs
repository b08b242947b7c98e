//! Package manifest discovery for plugin identity.
//!
//! A preset/plugin distributed as a package carries a `package.toml` next to
//! (or above) its module file:
//!
//! ```toml
//! [package]
//! name = "@armature/release-git"
//! main = "lib/index.so"
//! ```
//!
//! `name` may use the `@scope/name` convention; `main` is the declared entry
//! module, relative to the manifest directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use armature_core::{paths, CoreError, CoreResult};

/// File name of the package manifest.
pub const MANIFEST_FILE: &str = "package.toml";

/// The `[package]` table of a `package.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageManifest {
    /// Package name, optionally `@scope/name`.
    pub name: String,
    /// Declared entry module, relative to the manifest directory.
    #[serde(default)]
    pub main: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    package: PackageManifest,
}

/// A manifest together with the directory it was found in.
#[derive(Debug, Clone)]
pub struct LocatedManifest {
    /// Directory containing the `package.toml`.
    pub dir: PathBuf,
    /// The parsed manifest.
    pub manifest: PackageManifest,
}

impl PackageManifest {
    /// Parses the manifest at `path`.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::with_source(
                armature_core::ErrorKind::Configuration,
                format!("unable to read manifest '{}'", path.display()),
                e,
            )
        })?;
        let parsed: ManifestFile = toml::from_str(&raw)?;
        Ok(parsed.package)
    }

    /// Walks up from `start` looking for the nearest `package.toml`.
    pub fn find_ancestor(start: &Path) -> CoreResult<Option<LocatedManifest>> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            let candidate = d.join(MANIFEST_FILE);
            if candidate.is_file() {
                let manifest = Self::load(&candidate)?;
                return Ok(Some(LocatedManifest {
                    dir: d.to_path_buf(),
                    manifest,
                }));
            }
            dir = d.parent();
        }
        Ok(None)
    }

    /// Resolves the declared entry module against the manifest directory.
    pub fn entry_path(&self, dir: &Path) -> Option<PathBuf> {
        self.main
            .as_ref()
            .map(|main| paths::absolutize(Path::new(main), dir))
    }
}
