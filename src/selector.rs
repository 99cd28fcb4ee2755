//! Injection-target selection.
//!
//! Deterministic and policy-driven: candidates are the depth-1 entries of
//! the bundle's Frameworks directory that the main executable actually loads
//! (its recursive dependency closure), ordered by the configured strategy,
//! with the main executable as the final fallback. Directories this tool
//! created are skipped without recursing into them.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::bundle::{AppBundle, executable_in_bundle, file_name_of, is_injected_dir,
    natural_name_cmp, read_dir_sorted};
use crate::engine::snapshot;
use crate::error::{Result, TrollFoolsError};
use crate::macho::analyzer;

/// How candidates are ordered. A closed set, dispatched once per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Locale-style filename order.
    #[default]
    Lexicographic,
    /// Ascending file size, ties broken by filename.
    Fast,
    /// Directory enumeration order.
    Preorder,
    /// Reverse directory enumeration order.
    Postorder,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Lexicographic => "lexicographic",
            Strategy::Fast => "fast",
            Strategy::Preorder => "preorder",
            Strategy::Postorder => "postorder",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lexicographic" => Ok(Strategy::Lexicographic),
            "fast" => Ok(Strategy::Fast),
            "preorder" => Ok(Strategy::Preorder),
            "postorder" => Ok(Strategy::Postorder),
            other => Err(format!(
                "unknown strategy '{other}' (expected lexicographic, fast, preorder or postorder)"
            )),
        }
    }
}

/// The ordered candidate list for a mutating call: framework binaries and
/// dylibs the app loads, then the main executable (or the main executable
/// first under `prefer_main_executable`).
pub fn candidate_machos(
    bundle: &AppBundle,
    strategy: Strategy,
    prefer_main_executable: bool,
) -> Result<Vec<PathBuf>> {
    let closure = analyzer::linked_dylibs_recursively(
        &bundle.executable,
        bundle.executable_dir(),
        &bundle.frameworks_dir,
    )?;

    // Depth-1 entries of Frameworks: plain Mach-O files, or the executables
    // of framework bundles. Marker-carrying directories are ours; skip them
    // without looking inside.
    let mut enumerated = Vec::new();
    for entry in read_dir_sorted(&bundle.frameworks_dir) {
        if file_name_of(&entry).starts_with('.') {
            continue;
        }
        if entry.is_dir() {
            if is_injected_dir(&entry) {
                continue;
            }
            if let Ok(executable) = executable_in_bundle(&entry) {
                enumerated.push(executable);
            }
        } else if entry.is_file() && analyzer::is_macho(&entry) {
            enumerated.push(entry);
        }
    }

    let mut candidates: Vec<PathBuf> = enumerated
        .into_iter()
        .filter(|path| closure.contains(path))
        .collect();

    match strategy {
        Strategy::Lexicographic => {
            candidates.sort_by(|a, b| natural_name_cmp(&file_name_of(a), &file_name_of(b)));
        }
        Strategy::Fast => {
            candidates.sort_by(|a, b| {
                let size_of = |p: &PathBuf| p.metadata().map(|m| m.len()).unwrap_or(0);
                size_of(a)
                    .cmp(&size_of(b))
                    .then_with(|| natural_name_cmp(&file_name_of(a), &file_name_of(b)))
            });
        }
        Strategy::Preorder => {}
        Strategy::Postorder => candidates.reverse(),
    }

    debug!(strategy = %strategy, ?candidates, "sorted candidates");

    if prefer_main_executable {
        candidates.insert(0, bundle.executable.clone());
    } else {
        candidates.push(bundle.executable.clone());
    }

    Ok(candidates)
}

/// First candidate that is not protected by platform-store encryption.
/// Candidates that fail analysis fall through to the next one.
pub fn choose_target(
    bundle: &AppBundle,
    strategy: Strategy,
    prefer_main_executable: bool,
) -> Result<PathBuf> {
    for candidate in candidate_machos(bundle, strategy, prefer_main_executable)? {
        match analyzer::is_protected(&candidate) {
            Ok(false) => return Ok(candidate),
            Ok(true) => {
                debug!(candidate = %candidate.display(), "skipping protected binary");
            }
            Err(e) => {
                warn!(candidate = %candidate.display(), error = %e, "skipping unreadable candidate");
            }
        }
    }
    Err(TrollFoolsError::NoEligibleTarget)
}

/// Every candidate binary that currently has an alternate snapshot.
///
/// Historical targets may differ across operations (a strategy can pick a
/// different binary after the app changed), so ejection always scans the
/// whole candidate set rather than re-running selection.
pub fn snapshotted_machos(bundle: &AppBundle) -> Result<Vec<PathBuf>> {
    let candidates = candidate_machos(bundle, Strategy::Preorder, false)?;
    Ok(candidates
        .into_iter()
        .filter(|path| snapshot::has_alternate(path))
        .collect())
}
