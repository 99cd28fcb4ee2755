//! Shared runtime-dependency catalog.
//!
//! Library archives are discovered under two roots: a read-only root shipped
//! beside the tool and a writable, user-extensible root. Entries follow the
//! `<Key>.framework.zip` / `<Key>.dylib.zip` naming convention; on a
//! case-insensitive key collision the user root wins. An alias table folds
//! the hooking runtime's historical names onto one canonical key, so a
//! plug-in built against any of them resolves to the same module.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::bundle::RUNTIME_NAME;
use crate::error::{Result, TrollFoolsError};

const FRAMEWORK_ARCHIVE_SUFFIX: &str = ".framework.zip";
const DYLIB_ARCHIVE_SUFFIX: &str = ".dylib.zip";

/// Historical names for the hooking runtime, all resolved to
/// [`RUNTIME_NAME`].
const RUNTIME_ALIASES: &[&str] = &[
    "cydiasubstrate",
    "substrate",
    "libsubstrate",
    "substitute",
    "libsubstitute",
    "ellekit",
    "libellekit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryKind {
    Framework,
    Dylib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOrigin {
    Builtin,
    User,
}

/// One shared-dependency module available for materialization.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub key: String,
    pub kind: LibraryKind,
    pub archive: PathBuf,
    pub origin: CatalogOrigin,
}

impl CatalogEntry {
    /// File or directory name the archive expands to.
    pub fn item_name(&self) -> String {
        match self.kind {
            LibraryKind::Framework => format!("{}.framework", self.key),
            LibraryKind::Dylib => format!("{}.dylib", self.key),
        }
    }
}

/// Index over both catalog roots, built once per instance.
#[derive(Debug, Default)]
pub struct LibraryCatalog {
    entries: Vec<CatalogEntry>,
}

impl LibraryCatalog {
    /// Scan the read-only and user-extensible roots. Missing roots simply
    /// contribute nothing.
    pub fn scan(builtin_root: Option<&Path>, user_root: Option<&Path>) -> Self {
        let mut catalog = LibraryCatalog::default();
        if let Some(root) = builtin_root {
            catalog.scan_root(root, CatalogOrigin::Builtin);
        }
        if let Some(root) = user_root {
            catalog.scan_root(root, CatalogOrigin::User);
        }
        catalog
    }

    fn scan_root(&mut self, root: &Path, origin: CatalogOrigin) {
        // Archives sit at or near the root of either tree; a shallow walk
        // keeps scanning an executable-adjacent directory cheap.
        for entry in WalkDir::new(root)
            .max_depth(3)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            let (key, kind) = if let Some(key) = strip_suffix_ignore_case(&name, FRAMEWORK_ARCHIVE_SUFFIX) {
                (key, LibraryKind::Framework)
            } else if let Some(key) = strip_suffix_ignore_case(&name, DYLIB_ARCHIVE_SUFFIX) {
                (key, LibraryKind::Dylib)
            } else {
                continue;
            };

            debug!(key, ?origin, archive = %entry.path().display(), "catalog entry");
            // Later roots override earlier ones on case-insensitive collision.
            self.entries.retain(|existing| {
                !(existing.kind == kind && existing.key.eq_ignore_ascii_case(&key))
            });
            self.entries.push(CatalogEntry {
                key,
                kind,
                archive: entry.path().to_path_buf(),
                origin,
            });
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Resolve a module name (canonical or historical alias, with or without
    /// a packaging extension) to its catalog entry.
    pub fn resolve(&self, name: &str) -> Result<&CatalogEntry> {
        let key = canonical_key(name);
        self.entries
            .iter()
            .find(|entry| entry.key.eq_ignore_ascii_case(&key))
            .ok_or(TrollFoolsError::MissingCatalogEntry { key })
    }

    /// Unzip an entry into `dest_dir` and return the expanded item path.
    pub fn extract(&self, entry: &CatalogEntry, dest_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)?;
        let file = fs::File::open(&entry.archive)
            .map_err(|e| TrollFoolsError::archive_failed(&entry.archive, e))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| TrollFoolsError::archive_failed(&entry.archive, e))?;
        archive
            .extract(dest_dir)
            .map_err(|e| TrollFoolsError::archive_failed(&entry.archive, e))?;

        let item = dest_dir.join(entry.item_name());
        if !item.exists() {
            return Err(TrollFoolsError::archive_failed(
                &entry.archive,
                format!("archive does not contain {}", entry.item_name()),
            ));
        }
        Ok(item)
    }
}

/// Normalize a module name to its canonical catalog key: packaging
/// extensions stripped, historical runtime aliases folded.
pub fn canonical_key(name: &str) -> String {
    let mut stem = name.to_string();
    let mut stripped = true;
    while stripped {
        stripped = false;
        for suffix in [".zip", ".framework", ".dylib"] {
            if let Some(shorter) = strip_suffix_ignore_case(&stem, suffix) {
                stem = shorter;
                stripped = true;
            }
        }
    }

    if RUNTIME_ALIASES.contains(&stem.to_lowercase().as_str()) {
        RUNTIME_NAME.to_string()
    } else {
        stem
    }
}

fn strip_suffix_ignore_case(name: &str, suffix: &str) -> Option<String> {
    let bytes = name.as_bytes();
    if bytes.len() < suffix.len() {
        return None;
    }
    let (stem, tail) = bytes.split_at(bytes.len() - suffix.len());
    if tail.eq_ignore_ascii_case(suffix.as_bytes()) && !stem.is_empty() {
        // The tail is plain ASCII, so the stem is still valid UTF-8.
        Some(String::from_utf8_lossy(stem).into_owned())
    } else {
        None
    }
}
