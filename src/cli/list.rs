//! List command arguments

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Path to the application bundle to inspect
    pub bundle: PathBuf,

    /// Also show persisted-but-not-injected plug-ins
    #[arg(long)]
    pub persisted: bool,

    /// Emit machine-readable JSON
    #[arg(long)]
    pub json: bool,
}
