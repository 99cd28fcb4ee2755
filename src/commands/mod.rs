//! Command implementations
//!
//! Thin front-ends over the engine: build options from CLI arguments, run
//! the operation, present the outcome.

pub mod catalog;
pub mod eject;
pub mod inject;
pub mod list;
pub mod version;

use crate::cli::GlobalOptions;
use crate::engine::EngineOptions;

/// Engine options shared by every engine-backed command.
pub(crate) fn base_engine_options(globals: &GlobalOptions) -> EngineOptions {
    EngineOptions {
        store_root: globals.store_root.clone(),
        user_library_root: globals.library_root.clone(),
        direct_file_ops: globals.direct_fs.then_some(true),
        ..EngineOptions::default()
    }
}
