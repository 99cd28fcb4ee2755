//! Alternate snapshots: the rollback points for mutated binaries.
//!
//! A snapshot of `P` exists exactly while `P` is mutated relative to its
//! original bytes. It is created before the first mutation and deleted only
//! when `P` has been fully restored, so its presence is the durable sign
//! that a binary was patched by this tool.

use std::path::{Path, PathBuf};

/// Suffix appended (as an extension) to the mutated binary's path.
pub const ALTERNATE_SUFFIX: &str = "troll-fools.bak";

/// `<path>.troll-fools.bak` beside the target.
pub fn alternate_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".");
    name.push(ALTERNATE_SUFFIX);
    PathBuf::from(name)
}

pub fn has_alternate(target: &Path) -> bool {
    alternate_path(target).exists()
}
