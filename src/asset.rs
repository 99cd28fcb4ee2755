//! Injectable asset classification.
//!
//! Three packaging shapes exist: a bare shared library, a framework (a
//! directory-packaged library with metadata), and a loadable bundle that is
//! copied but never linked. Everything else is either a container to expand
//! or noise to ignore.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Dylib,
    Framework,
    Bundle,
}

impl AssetKind {
    /// Classify a path by its (case-insensitive) extension.
    pub fn of(path: &Path) -> Option<AssetKind> {
        match path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("dylib") => Some(AssetKind::Dylib),
            Some("framework") => Some(AssetKind::Framework),
            Some("bundle") => Some(AssetKind::Bundle),
            _ => None,
        }
    }

    /// Bundle-kind assets are copied verbatim; the other kinds get linked
    /// into a target binary.
    pub fn requires_patch(self) -> bool {
        !matches!(self, AssetKind::Bundle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Dylib => "dylib",
            AssetKind::Framework => "framework",
            AssetKind::Bundle => "bundle",
        }
    }
}

/// One injectable unit, after preprocessing.
#[derive(Debug, Clone)]
pub struct Asset {
    pub path: PathBuf,
    pub kind: AssetKind,
}

impl Asset {
    pub fn new(path: PathBuf, kind: AssetKind) -> Self {
        Self { path, kind }
    }

    /// Classify an existing path, or `None` when it is not an asset shape.
    pub fn classify(path: &Path) -> Option<Asset> {
        AssetKind::of(path).map(|kind| Asset::new(path.to_path_buf(), kind))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
