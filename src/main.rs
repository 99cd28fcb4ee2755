//! TrollFools - Mach-O plug-in injection
//!
//! Patches an installed application's on-disk binary image so it loads
//! additional dylibs, frameworks or bundles at launch, and can fully and
//! safely undo that mutation again, keeping the binary loadable under
//! code-signing enforcement.

use clap::Parser;

mod asset;
mod bundle;
mod catalog;
mod cli;
mod commands;
mod engine;
mod error;
mod executor;
mod fsutil;
mod ledger;
mod macho;
mod preprocess;
mod progress;
mod selector;
mod temp;
#[cfg(test)]
mod test_fixtures;

use cli::{Cli, Commands};

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_filter = if verbose {
        "trollfools=debug"
    } else {
        "trollfools=warn"
    };
    let filter = EnvFilter::try_from_env("TROLLFOOLS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.globals.verbose);

    let result = match cli.command {
        Commands::Inject(args) => commands::inject::run(&cli.globals, args),
        Commands::Eject(args) => commands::eject::run(&cli.globals, args),
        Commands::List(args) => commands::list::run(&cli.globals, args),
        Commands::Catalog(args) => commands::catalog::run(&cli.globals, args),
        Commands::Version => commands::version::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
