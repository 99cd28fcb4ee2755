//! Eject command arguments

use clap::{ArgGroup, Args};
use std::path::PathBuf;

#[derive(Args, Debug)]
#[command(group = ArgGroup::new("selection").required(true).args(["paths", "all"]))]
pub struct EjectArgs {
    /// Path to the target application bundle
    pub bundle: PathBuf,

    /// Injected plug-in paths to eject
    #[arg(long = "path", short = 'p', num_args = 1..)]
    pub paths: Vec<PathBuf>,

    /// Eject every injected plug-in
    #[arg(long)]
    pub all: bool,

    /// Also remove persisted copies from the store
    #[arg(long)]
    pub desist: bool,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}
