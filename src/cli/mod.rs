//! CLI definitions using clap derive API
//!
//! This module is organized into submodules for each command's argument types:
//! - inject: Inject command arguments
//! - eject: Eject command arguments
//! - list: List command arguments
//! - catalog: Catalog command arguments

use clap::builder::{Styles, styling::AnsiColor};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod catalog;
pub mod eject;
pub mod inject;
pub mod list;

pub use catalog::CatalogArgs;
pub use eject::EjectArgs;
pub use inject::InjectArgs;
pub use list::ListArgs;

/// TrollFools - Mach-O plug-in injection
///
/// Patch an installed application so it loads additional dylibs, frameworks
/// or bundles at launch, and cleanly undo the patch again.
#[derive(Parser, Debug)]
#[command(
    name = "trollfools",
    author,
    version,
    color = clap::ColorChoice::Always,
    styles = Styles::styled()
        .header(AnsiColor::Green.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default().bold())
        .placeholder(AnsiColor::Cyan.on_default()),
    about = "Inject and eject plug-ins for Mach-O application bundles",
    after_help = "\x1b[1m\x1b[32mExamples:\x1b[0m\n   \
                  trollfools inject ./Demo.app -p Tweak.dylib     \x1b[90m# Patch the app to load a dylib\x1b[0m\n   \
                  trollfools inject ./Demo.app -p pack.zip --persist \x1b[90m# Inject and keep a durable copy\x1b[0m\n   \
                  trollfools eject ./Demo.app --all              \x1b[90m# Return the bundle to pristine state\x1b[0m\n   \
                  trollfools list ./Demo.app                     \x1b[90m# Show injected plug-ins\x1b[0m\n   \
                  trollfools catalog                             \x1b[90m# Show shared-library catalog entries\x1b[0m\n\n\
                  "
)]
pub struct Cli {
    #[command(flatten)]
    pub globals: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Persisted-plugin store root (defaults to the user data directory)
    #[arg(long, global = true, env = "TROLLFOOLS_STORE_ROOT")]
    pub store_root: Option<PathBuf>,

    /// User-extensible library catalog root
    #[arg(long, global = true, env = "TROLLFOOLS_LIBRARY_ROOT")]
    pub library_root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Perform file operations directly instead of spawning platform tools
    #[arg(long, global = true, hide = true)]
    pub direct_fs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inject plug-ins into an application bundle
    Inject(InjectArgs),

    /// Eject plug-ins from an application bundle
    Eject(EjectArgs),

    /// List injected plug-ins
    List(ListArgs),

    /// Show shared-library catalog entries
    Catalog(CatalogArgs),

    /// Show version information
    #[command(hide = true)]
    Version,
}
