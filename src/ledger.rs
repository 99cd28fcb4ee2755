//! Durable record of injected assets outside any bundle.
//!
//! The store survives app reinstallation: one subdirectory per application
//! identifier, each holding verbatim copies of the injected assets. Enable/
//! disable flows move an asset between stored-but-not-injected and injected
//! by composing this store with inject/eject; the store, not the bundle's
//! Frameworks directory, is the durable source of truth.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::asset::Asset;
use crate::bundle::natural_name_cmp;
use crate::error::{Result, TrollFoolsError};
use crate::fsutil;

#[derive(Debug, Clone)]
pub struct PersistenceLedger {
    root: PathBuf,
}

impl PersistenceLedger {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `<data dir>/trollfools/persistent-plugins`, with a temp-dir fallback
    /// for environments without a data directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(crate::temp::temp_dir_base)
            .join("trollfools")
            .join("persistent-plugins")
    }

    pub fn app_dir(&self, app_id: &str) -> PathBuf {
        self.root.join(app_id)
    }

    /// Copy assets into the store for `app_id`, replacing stale copies.
    pub fn persist(&self, assets: &[Asset], app_id: &str) -> Result<()> {
        let dir = self.app_dir(app_id);
        fs::create_dir_all(&dir).map_err(|e| TrollFoolsError::LedgerFailed {
            message: e.to_string(),
        })?;

        for asset in assets {
            let dest = dir.join(asset.file_name());
            debug!(asset = %asset.path.display(), dest = %dest.display(), "persist");
            fsutil::copy_path(&asset.path, &dest, true).map_err(|e| {
                TrollFoolsError::LedgerFailed {
                    message: format!("{}: {}", dest.display(), e),
                }
            })?;
        }
        Ok(())
    }

    /// Back up any asset that is not already stored. Best-effort: an asset
    /// about to be ejected should stay recoverable, but a failing store must
    /// not block the ejection itself.
    pub fn persist_if_missing(&self, assets: &[Asset], app_id: &str) {
        let dir = self.app_dir(app_id);
        let missing: Vec<Asset> = assets
            .iter()
            .filter(|asset| !dir.join(asset.file_name()).exists())
            .cloned()
            .collect();
        if missing.is_empty() {
            return;
        }
        if let Err(e) = self.persist(&missing, app_id) {
            warn!(app_id, error = %e, "unable to back up assets before eject");
        }
    }

    /// Remove stored copies. Best-effort per asset.
    pub fn desist(&self, assets: &[Asset], app_id: &str) {
        let dir = self.app_dir(app_id);
        for asset in assets {
            let dest = dir.join(asset.file_name());
            debug!(dest = %dest.display(), "desist");
            if let Err(e) = fsutil::remove_path(&dest) {
                warn!(dest = %dest.display(), error = %e, "unable to remove stored copy");
            }
        }
        // Drop the per-app directory once it holds nothing.
        if fs::read_dir(&dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
            let _ = fs::remove_dir(&dir);
        }
    }

    /// Stored assets for `app_id`, in display order.
    pub fn persisted_assets(&self, app_id: &str) -> Vec<Asset> {
        let dir = self.app_dir(app_id);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut assets: Vec<Asset> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| Asset::classify(&e.path()))
            .collect();
        assets.sort_by(|a, b| natural_name_cmp(&a.file_name(), &b.file_name()));
        assets
    }

    pub fn has_persisted_assets(&self, app_id: &str) -> bool {
        !self.persisted_assets(app_id).is_empty()
    }
}

/// Classify paths for store operations, ignoring anything that is not an
/// asset shape.
pub fn classify_assets(paths: &[PathBuf]) -> Vec<Asset> {
    paths.iter().filter_map(|p| Asset::classify(p)).collect()
}
