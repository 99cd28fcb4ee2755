//! Application bundle facts and marker bookkeeping.
//!
//! An [`AppBundle`] is read once when an engine is constructed: executable
//! and Frameworks locations from `Info.plist`, the identifier, and the
//! signing team id off the main executable. The injected-marker protocol
//! also lives here: a fixed-name file dropped into every directory this tool
//! created, checked before the tool ever deletes a directory again.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::snapshot;
use crate::error::{Result, TrollFoolsError};
use crate::macho::analyzer;

/// Marker dropped inside tool-managed directories.
pub const INJECTED_MARKER_NAME: &str = ".troll-fools";

/// Canonical hooking-runtime module.
pub const RUNTIME_NAME: &str = "CydiaSubstrate";
pub const RUNTIME_FRAMEWORK_NAME: &str = "CydiaSubstrate.framework";

/// File names (lowercased) that are managed by the library catalog and must
/// never be injected as plain assets: the hooking runtime under all of its
/// historical names.
pub const RESERVED_RUNTIME_NAMES: &[&str] = &[
    "cydiasubstrate",
    "cydiasubstrate.framework",
    "ellekit",
    "ellekit.framework",
    "libsubstrate.dylib",
    "libsubstitute.dylib",
    "libellekit.dylib",
];

pub fn is_reserved_runtime_name(file_name: &str) -> bool {
    RESERVED_RUNTIME_NAMES.contains(&file_name.to_lowercase().as_str())
}

#[derive(Debug, Deserialize)]
struct InfoPlist {
    #[serde(rename = "CFBundleIdentifier")]
    identifier: String,
    #[serde(rename = "CFBundleExecutable")]
    executable: String,
}

/// An installed application package.
#[derive(Debug, Clone)]
pub struct AppBundle {
    pub root: PathBuf,
    pub executable: PathBuf,
    pub frameworks_dir: PathBuf,
    pub identifier: String,
    pub team_id: Option<String>,
}

impl AppBundle {
    /// Read bundle facts from disk. Fails when `Info.plist` is missing or
    /// incomplete, or when the main executable cannot be analyzed.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(TrollFoolsError::bundle_invalid(root, "not a directory"));
        }

        let info: InfoPlist = plist::from_file(root.join("Info.plist"))
            .map_err(|e| TrollFoolsError::bundle_invalid(root, e))?;

        let executable = root.join(&info.executable);
        if !executable.is_file() {
            return Err(TrollFoolsError::bundle_invalid(
                root,
                format!("missing executable '{}'", info.executable),
            ));
        }

        let frameworks_dir = root.join("Frameworks");
        if !frameworks_dir.exists() {
            let _ = fs::create_dir_all(&frameworks_dir);
        }

        // Unlike framework candidates, an unreadable main executable aborts
        // engine construction.
        let team_id = analyzer::team_identifier(&executable)?;

        Ok(AppBundle {
            root: root.to_path_buf(),
            executable,
            frameworks_dir,
            identifier: info.identifier,
            team_id,
        })
    }

    pub fn executable_dir(&self) -> &Path {
        self.executable.parent().unwrap_or(&self.root)
    }

    pub fn runtime_framework_dir(&self) -> PathBuf {
        self.frameworks_dir.join(RUNTIME_FRAMEWORK_NAME)
    }

    /// Loadable bundles injected into the bundle root, marker-gated.
    pub fn injected_bundles(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = read_dir_sorted(&self.root)
            .into_iter()
            .filter(|p| {
                p.extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .as_deref()
                    == Some("bundle")
            })
            .filter(|p| !is_reserved(p))
            .filter(|p| is_injected_dir(p))
            .collect();
        found.sort_by(|a, b| natural_name_cmp(&file_name_of(a), &file_name_of(b)));
        found
    }

    /// Dylibs and frameworks injected into the Frameworks directory.
    ///
    /// Frameworks are marker-gated. Dylibs cannot carry a marker, so they
    /// are identified by what injection actually did: load commands present
    /// in a snapshotted binary but absent from its snapshot. A bundle
    /// without snapshots therefore has no injected dylibs, no matter what
    /// its Frameworks directory ships.
    pub fn injected_dylibs_and_frameworks(&self) -> Vec<PathBuf> {
        let mut dylibs: Vec<PathBuf> = Vec::new();
        for target in self.snapshot_backed_binaries() {
            let Ok(current) = analyzer::loaded_dylibs(&target) else {
                continue;
            };
            let baseline =
                analyzer::loaded_dylibs(&snapshot::alternate_path(&target)).unwrap_or_default();
            for name in current {
                if baseline.contains(&name) {
                    continue;
                }
                let Some(file) = name.strip_prefix("@rpath/") else {
                    continue;
                };
                if file.contains('/') || !file.to_lowercase().ends_with(".dylib") {
                    continue;
                }
                if file.starts_with("libswift") || is_reserved_runtime_name(file) {
                    continue;
                }
                let path = self.frameworks_dir.join(file);
                if path.is_file() && !dylibs.contains(&path) {
                    dylibs.push(path);
                }
            }
        }
        dylibs.sort_by(|a, b| natural_name_cmp(&file_name_of(a), &file_name_of(b)));

        let mut frameworks: Vec<PathBuf> = read_dir_sorted(&self.frameworks_dir)
            .into_iter()
            .filter(|p| p.is_dir())
            .filter(|p| {
                p.extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .as_deref()
                    == Some("framework")
            })
            .filter(|p| !is_reserved(p))
            .filter(|p| is_injected_dir(p))
            .collect();
        frameworks.sort_by(|a, b| natural_name_cmp(&file_name_of(a), &file_name_of(b)));

        dylibs.extend(frameworks);
        dylibs
    }

    /// Bundle binaries that currently have an alternate snapshot: plain
    /// files in Frameworks, framework executables, and the main executable.
    pub fn snapshot_backed_binaries(&self) -> Vec<PathBuf> {
        let mut binaries = Vec::new();
        for entry in read_dir_sorted(&self.frameworks_dir) {
            if entry.is_file() {
                binaries.push(entry);
            } else if entry.is_dir() {
                if let Ok(executable) = executable_in_bundle(&entry) {
                    binaries.push(executable);
                }
            }
        }
        binaries.push(self.executable.clone());
        binaries.retain(|binary| snapshot::has_alternate(binary));
        binaries
    }

    /// Every injected asset in the bundle, in display order.
    pub fn injected_assets(&self) -> Vec<PathBuf> {
        let mut assets = self.injected_bundles();
        assets.extend(self.injected_dylibs_and_frameworks());
        assets.sort_by(|a, b| natural_name_cmp(&file_name_of(a), &file_name_of(b)));
        assets
    }

    pub fn has_injected_assets(&self) -> bool {
        !self.injected_assets().is_empty()
    }
}

/// Locate the executable binary inside a framework or loadable bundle:
/// `Info.plist`'s `CFBundleExecutable` when present, the conventional
/// `<Stem>.framework/<Stem>` layout otherwise.
pub fn executable_in_bundle(dir: &Path) -> Result<PathBuf> {
    let info_plist = dir.join("Info.plist");
    if info_plist.is_file() {
        if let Ok(info) = plist::from_file::<_, InfoPlist>(&info_plist) {
            let executable = dir.join(&info.executable);
            if executable.is_file() {
                return Ok(executable);
            }
        }
    }

    if let Some(stem) = dir.file_stem() {
        let executable = dir.join(stem);
        if executable.is_file() {
            return Ok(executable);
        }
    }

    Err(TrollFoolsError::bundle_invalid(
        dir,
        "unable to locate bundle executable",
    ))
}

/// Whether this directory was produced by this tool.
pub fn is_injected_dir(dir: &Path) -> bool {
    dir.is_dir() && dir.join(INJECTED_MARKER_NAME).exists()
}

/// Drop the injected marker into a directory-shaped asset.
pub fn mark_injected(dir: &Path) -> Result<()> {
    fs::write(dir.join(INJECTED_MARKER_NAME), [])?;
    Ok(())
}

fn is_reserved(path: &Path) -> bool {
    is_reserved_runtime_name(&file_name_of(path))
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Depth-1 directory listing in stable (byte-order) enumeration order.
pub(crate) fn read_dir_sorted(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    paths
}

/// Case-insensitive filename comparison with numeric runs compared as
/// numbers, standing in for the platform's localized standard compare.
pub fn natural_name_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let mut lhs = a.chars().peekable();
    let mut rhs = b.chars().peekable();

    loop {
        match (lhs.peek().copied(), rhs.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let nx = take_number(&mut lhs);
                let ny = take_number(&mut rhs);
                match nx.cmp(&ny) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            (Some(x), Some(y)) => {
                let (cx, cy) = (
                    x.to_lowercase().next().unwrap_or(x),
                    y.to_lowercase().next().unwrap_or(y),
                );
                match cx.cmp(&cy) {
                    Ordering::Equal => {
                        lhs.next();
                        rhs.next();
                    }
                    other => return other,
                }
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> u64 {
    let mut value: u64 = 0;
    while let Some(c) = chars.peek().copied() {
        let Some(digit) = c.to_digit(10) else { break };
        value = value.saturating_mul(10).saturating_add(u64::from(digit));
        chars.next();
    }
    value
}
