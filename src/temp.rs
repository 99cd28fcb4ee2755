//! Scratch-space management for extraction and staging.
//!
//! Every engine instance owns one scratch directory; preprocessed assets and
//! materialized libraries live there until the instance is dropped. The base
//! is always an absolute path so scratch dirs are never created under the
//! current working directory (e.g. when TMPDIR=tmp).

use std::env;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::error::Result;

/// Returns an absolute directory path suitable for creating scratch
/// directories under.
pub fn temp_dir_base() -> PathBuf {
    let t = env::temp_dir();
    if t.is_absolute() {
        t
    } else {
        PathBuf::from("/tmp")
    }
}

/// Create a fresh scratch directory, removed when the handle is dropped.
pub fn scratch_dir() -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix("trollfools-")
        .tempdir_in(temp_dir_base())?;
    Ok(dir)
}
