//! Inject/eject orchestration with snapshot-based rollback.
//!
//! One engine instance serves one application bundle. All state an operation
//! needs (bundle facts, library catalog, materialized-library cache, scratch
//! space) lives on the instance, so engines for different bundles never
//! interfere and a single instance is unit-testable in isolation. Operations
//! are sequential; concurrent calls against the same bundle are the caller's
//! bug.

pub mod commands;
pub mod snapshot;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::asset::{Asset, AssetKind};
use crate::bundle::{
    AppBundle, RUNTIME_FRAMEWORK_NAME, RUNTIME_NAME, executable_in_bundle, file_name_of,
    is_injected_dir, is_reserved_runtime_name, mark_injected,
};
use crate::catalog::{LibraryCatalog, LibraryKind};
use crate::error::{Result, TrollFoolsError};
use crate::executor::Executor;
use crate::ledger::{PersistenceLedger, classify_assets};
use crate::macho::{analyzer, patcher};
use crate::preprocess;
use crate::selector::{self, Strategy};

pub use commands::{PrivilegedOps, ToolPaths};

/// Search path every patched binary gains, so `@rpath/` assets resolve.
const FRAMEWORKS_RPATH: &str = "@executable_path/Frameworks";

/// Fallback team identifier for unsigned or ad-hoc signed apps.
const NULL_TEAM_ID: &str = "0000000000";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub strategy: Strategy,
    /// Insert weak load commands instead of strong ones.
    pub weak_reference: bool,
    /// Try the main executable before the framework candidates.
    pub prefer_main_executable: bool,
    /// Persisted-plugin store root; defaults to the user data directory.
    pub store_root: Option<PathBuf>,
    /// Read-only catalog root; defaults to the executable's directory.
    pub builtin_library_root: Option<PathBuf>,
    /// Writable catalog root; defaults to the user data directory.
    pub user_library_root: Option<PathBuf>,
    pub tools: ToolPaths,
    /// Force direct or spawned file operations; `None` keys off the
    /// effective uid.
    pub direct_file_ops: Option<bool>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            weak_reference: false,
            prefer_main_executable: false,
            store_root: None,
            builtin_library_root: None,
            user_library_root: None,
            tools: ToolPaths::default(),
            direct_file_ops: None,
        }
    }
}

pub struct PatchEngine {
    bundle: AppBundle,
    options: EngineOptions,
    catalog: LibraryCatalog,
    ledger: PersistenceLedger,
    ops: PrivilegedOps,
    scratch: TempDir,
    /// Materialized shared libraries, memoized per engine instance.
    materialized: HashMap<String, PathBuf>,
}

impl PatchEngine {
    pub fn new(bundle_root: &Path, options: EngineOptions) -> Result<Self> {
        let ops = match options.direct_file_ops {
            Some(direct) => PrivilegedOps::new(
                Arc::new(crate::executor::SystemExecutor),
                options.tools.clone(),
                direct,
            ),
            None => PrivilegedOps::host_default(options.tools.clone()),
        };
        Self::build(bundle_root, options, ops)
    }

    /// Construct with a caller-supplied executor, the seam tests use.
    pub fn with_executor(
        bundle_root: &Path,
        options: EngineOptions,
        executor: Arc<dyn Executor>,
    ) -> Result<Self> {
        let direct = options
            .direct_file_ops
            .unwrap_or_else(|| unsafe { libc::geteuid() } == 0);
        let ops = PrivilegedOps::new(executor, options.tools.clone(), direct);
        Self::build(bundle_root, options, ops)
    }

    fn build(bundle_root: &Path, options: EngineOptions, ops: PrivilegedOps) -> Result<Self> {
        let bundle = AppBundle::open(bundle_root)?;

        let builtin_root = options.builtin_library_root.clone().or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
        });
        let user_root = options.user_library_root.clone().or_else(|| {
            dirs::data_dir().map(|d| d.join("trollfools").join("libraries"))
        });
        let catalog = LibraryCatalog::scan(builtin_root.as_deref(), user_root.as_deref());

        let ledger = PersistenceLedger::new(
            options
                .store_root
                .clone()
                .unwrap_or_else(PersistenceLedger::default_root),
        );

        Ok(Self {
            bundle,
            options,
            catalog,
            ledger,
            ops,
            scratch: crate::temp::scratch_dir()?,
            materialized: HashMap::new(),
        })
    }

    pub fn bundle(&self) -> &AppBundle {
        &self.bundle
    }

    pub fn ledger(&self) -> &PersistenceLedger {
        &self.ledger
    }

    /// Injected assets currently present in the bundle.
    pub fn injected_assets(&self) -> Vec<Asset> {
        classify_assets(&self.bundle.injected_assets())
    }

    fn team_id(&self) -> &str {
        self.bundle
            .team_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(NULL_TEAM_ID)
    }

    fn terminate_app(&self) {
        self.ops.terminate(&file_name_of(&self.bundle.executable));
    }


    /// Inject `inputs` into the bundle, optionally recording them in the
    /// persisted-plugin store.
    pub fn inject(&mut self, inputs: &[PathBuf], persist: bool) -> Result<()> {
        let assets = preprocess::prepare_assets(self.scratch.path(), inputs)?;
        self.terminate_app();

        let (bundles, patchables): (Vec<Asset>, Vec<Asset>) = assets
            .iter()
            .cloned()
            .partition(|asset| !asset.kind.requires_patch());

        self.inject_bundles(&bundles)?;
        self.inject_patchables(&patchables)?;

        if persist {
            self.ledger.persist(&assets, &self.bundle.identifier)?;
        }
        Ok(())
    }

    /// Loadable bundles are plain copies into the bundle root; nothing is
    /// patched for them.
    fn inject_bundles(&self, assets: &[Asset]) -> Result<()> {
        for asset in assets {
            let dest = self.bundle.root.join(asset.file_name());
            self.ops.copy(&asset.path, &dest, true)?;
            self.ops.chown_installd(&dest, true)?;
        }
        Ok(())
    }

    fn inject_patchables(&mut self, assets: &[Asset]) -> Result<()> {
        if assets.is_empty() {
            return Ok(());
        }

        for asset in assets {
            // A store-encrypted asset cannot be rewritten or re-signed
            // without corrupting it.
            let macho = asset_macho(asset)?;
            if analyzer::is_protected(&macho)? {
                return Err(TrollFoolsError::ProtectedBinary {
                    path: macho.display().to_string(),
                });
            }
            self.canonicalize_runtime_references(asset)?;
            self.sign_asset(asset)?;
        }

        // The runtime framework rides along only when an asset made us
        // materialize it.
        let mut resources: Vec<PathBuf> = Vec::new();
        if let Some(runtime) = self.materialized.get(RUNTIME_NAME) {
            resources.push(runtime.clone());
        }
        resources.extend(assets.iter().map(|a| a.path.clone()));

        let target = selector::choose_target(
            &self.bundle,
            self.options.strategy,
            self.options.prefer_main_executable,
        )?;
        info!(target = %target.display(), "selected injection target");

        // Sole rollback point: snapshot before any further mutation.
        self.make_alternate(&target)?;

        let mut copied: Vec<PathBuf> = Vec::new();
        let result = self.apply_patches(&target, assets, &resources, &mut copied);
        if let Err(e) = result {
            warn!(error = %e, "injection failed, rolling back");
            if let Err(restore) = self.restore_alternate(&target) {
                warn!(error = %restore, "rollback restore failed");
            }
            for path in &copied {
                let _ = self.ops.remove(path, true);
            }
            return Err(e);
        }
        Ok(())
    }

    fn apply_patches(
        &self,
        target: &Path,
        assets: &[Asset],
        resources: &[PathBuf],
        copied: &mut Vec<PathBuf>,
    ) -> Result<()> {
        for resource in resources {
            let dest = self.bundle.frameworks_dir.join(file_name_of(resource));
            // Track before copying so a half-written copy is cleaned up too.
            copied.push(dest.clone());
            self.ops.copy(resource, &dest, true)?;
            self.ops.chown_installd(&dest, resource.is_dir())?;
        }

        for asset in assets {
            let name = load_command_name(asset)?;
            if !analyzer::runtime_paths(target)?.contains(&FRAMEWORKS_RPATH.to_string()) {
                patcher::insert_rpath_command(target, FRAMEWORKS_RPATH)?;
            }
            if !analyzer::loaded_dylibs(target)?.contains(&name) {
                patcher::insert_dylib_command(target, &name, self.options.weak_reference)?;
            }
            self.normalize_stale_references(target, &name)?;
        }

        self.ops
            .core_trust_bypass(target, self.team_id(), self.scratch.path())?;
        self.ops.chown_installd(target, false)?;
        Ok(())
    }

    /// Rewrite an asset's references to any historical hooking-runtime name
    /// onto the canonical local copy, materializing it on first need.
    fn canonicalize_runtime_references(&mut self, asset: &Asset) -> Result<()> {
        let macho = asset_macho(asset)?;
        let canonical = format!("{FRAMEWORKS_RPATH}/{RUNTIME_FRAMEWORK_NAME}/{RUNTIME_NAME}");

        for dylib in analyzer::loaded_dylibs(&macho)? {
            let last_component = dylib.rsplit('/').next().unwrap_or(&dylib);
            if !is_reserved_runtime_name(last_component) || dylib == canonical {
                continue;
            }
            self.materialize(RUNTIME_NAME)?;
            debug!(asset = %macho.display(), from = %dylib, "canonicalizing runtime reference");
            patcher::change_dylib_command(&macho, &dylib, &canonical)?;
        }
        Ok(())
    }

    /// Unzip a catalog module into scratch space. Memoized: repeated calls
    /// return the same materialized path without re-extracting.
    pub fn materialize(&mut self, name: &str) -> Result<PathBuf> {
        let entry = self.catalog.resolve(name)?;
        let memo_key = crate::catalog::canonical_key(&entry.key);
        if let Some(existing) = self.materialized.get(&memo_key) {
            return Ok(existing.clone());
        }

        let dest = self.scratch.path().join("library").join(&entry.key);
        let item = self.catalog.extract(entry, &dest)?;
        info!(key = %entry.key, item = %item.display(), "materialized shared library");

        let (macho, recursive) = match entry.kind {
            LibraryKind::Framework => {
                mark_injected(&item)?;
                (executable_in_bundle(&item)?, true)
            }
            LibraryKind::Dylib => (item.clone(), false),
        };
        self.ops
            .core_trust_bypass(&macho, self.team_id(), self.scratch.path())?;
        self.ops.chown_installd(&item, recursive)?;

        self.materialized.insert(memo_key, item.clone());
        Ok(item)
    }

    fn sign_asset(&self, asset: &Asset) -> Result<()> {
        let macho = asset_macho(asset)?;
        self.ops
            .core_trust_bypass(&macho, self.team_id(), self.scratch.path())?;
        self.ops
            .chown_installd(&asset.path, asset.path.is_dir())?;
        Ok(())
    }

    /// Point any stale reference to the asset (an absolute install path from
    /// a previous life) at its final `@rpath/` install name.
    fn normalize_stale_references(&self, target: &Path, name: &str) -> Result<()> {
        let Some(item_name) = name.strip_prefix("@rpath/") else {
            return Ok(());
        };
        for dylib in analyzer::loaded_dylibs(target)? {
            if dylib != name && dylib.ends_with(&format!("/{item_name}")) {
                patcher::change_dylib_command(target, &dylib, name)?;
            }
        }
        Ok(())
    }


    /// Remove previously injected assets, optionally dropping their
    /// persisted copies.
    pub fn eject(&mut self, paths: &[PathBuf], desist: bool) -> Result<()> {
        let assets = classify_assets(paths);
        if assets.is_empty() {
            return Err(TrollFoolsError::EmptyAssetList);
        }
        self.terminate_app();

        if desist {
            self.ledger.desist(&assets, &self.bundle.identifier);
        } else {
            // Ejected-but-not-desisted assets must stay recoverable.
            self.ledger
                .persist_if_missing(&assets, &self.bundle.identifier);
        }

        let (bundles, patchables): (Vec<Asset>, Vec<Asset>) = assets
            .into_iter()
            .partition(|asset| !asset.kind.requires_patch());

        self.eject_bundles(&bundles);
        self.eject_patchables(&patchables)?;
        Ok(())
    }

    /// Eject every injected asset; with `desist`, also clear the persisted
    /// store for this app.
    pub fn eject_all(&mut self, desist: bool) -> Result<()> {
        let injected = self.bundle.injected_assets();
        if !injected.is_empty() {
            self.eject(&injected, desist)?;
        }

        if desist && self.ledger.has_persisted_assets(&self.bundle.identifier) {
            let persisted = self.ledger.persisted_assets(&self.bundle.identifier);
            self.ledger.desist(&persisted, &self.bundle.identifier);
        }
        Ok(())
    }

    /// Delete bundle-kind assets, but only ones this tool created.
    fn eject_bundles(&self, assets: &[Asset]) {
        for asset in assets {
            if !is_injected_dir(&asset.path) {
                debug!(asset = %asset.path.display(), "no injected marker, leaving in place");
                continue;
            }
            if let Err(e) = self.ops.remove(&asset.path, true) {
                warn!(asset = %asset.path.display(), error = %e, "unable to remove bundle");
            }
        }
    }

    fn eject_patchables(&mut self, assets: &[Asset]) -> Result<()> {
        if assets.is_empty() {
            return Ok(());
        }

        // Every historically snapshotted binary, not just the current
        // strategy's pick: targets may differ across operations, and this
        // scan is the only safeguard against orphaned patches.
        let targets = selector::snapshotted_machos(&self.bundle)?;
        if targets.is_empty() {
            warn!("no modified binaries found in bundle");
            return Err(TrollFoolsError::NoEligibleTarget);
        }
        info!(?targets, "modified binaries");

        // Per-target critical section; a failure aborts remaining work but
        // binaries already processed keep their (still valid) state.
        for target in &targets {
            for asset in assets {
                let name = load_command_name(asset)?;
                patcher::remove_dylib_command(target, &name)?;
            }
            self.ops
                .core_trust_bypass(target, self.team_id(), self.scratch.path())?;
            self.ops.chown_installd(target, false)?;
        }

        for asset in assets {
            if let Err(e) = self.ops.remove(&asset.path, asset.path.is_dir()) {
                warn!(asset = %asset.path.display(), error = %e, "unable to remove asset");
            }
        }

        // Last asset gone: restore every snapshot and drop the runtime
        // framework, returning the bundle to pristine state.
        if !self.bundle.has_injected_assets() {
            for target in &targets {
                self.restore_alternate(target)?;
            }
            let _ = self
                .ops
                .remove(&self.bundle.runtime_framework_dir(), true);
        }
        Ok(())
    }


    fn make_alternate(&self, target: &Path) -> Result<()> {
        if snapshot::has_alternate(target) {
            return Ok(());
        }
        self.ops
            .copy(target, &snapshot::alternate_path(target), false)
    }

    fn restore_alternate(&self, target: &Path) -> Result<()> {
        if !snapshot::has_alternate(target) {
            return Ok(());
        }
        self.ops
            .rename(&snapshot::alternate_path(target), target, true)
    }
}

/// The Mach-O inside an asset: the file itself for a dylib, the bundle
/// executable for a framework or loadable bundle.
fn asset_macho(asset: &Asset) -> Result<PathBuf> {
    match asset.kind {
        AssetKind::Dylib => Ok(asset.path.clone()),
        AssetKind::Framework | AssetKind::Bundle => executable_in_bundle(&asset.path),
    }
}

/// The install name a patched target will load the asset by.
fn load_command_name(asset: &Asset) -> Result<String> {
    match asset.kind {
        AssetKind::Dylib => Ok(format!("@rpath/{}", asset.file_name())),
        AssetKind::Framework => {
            let executable = executable_in_bundle(&asset.path)?;
            Ok(format!(
                "@rpath/{}/{}",
                asset.file_name(),
                file_name_of(&executable)
            ))
        }
        AssetKind::Bundle => Err(TrollFoolsError::patch_failed(
            &asset.path,
            "loadable bundles are copied, never linked",
        )),
    }
}
