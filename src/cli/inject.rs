//! Inject command arguments

use clap::Args;
use std::path::PathBuf;

use crate::selector::Strategy;

#[derive(Args, Debug)]
pub struct InjectArgs {
    /// Path to the target application bundle
    pub bundle: PathBuf,

    /// Plug-in paths to inject (.dylib, .framework, .bundle, .zip or .deb)
    #[arg(long = "path", short = 'p', required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,

    /// Insert weak load commands instead of strong ones
    #[arg(long)]
    pub weak: bool,

    /// Target selection strategy: lexicographic, fast, preorder or postorder
    #[arg(long, default_value = "lexicographic")]
    pub strategy: Strategy,

    /// Try the main executable before the framework candidates
    #[arg(long = "prefer-main")]
    pub prefer_main_executable: bool,

    /// Keep durable copies of the injected plug-ins
    #[arg(long)]
    pub persist: bool,
}
