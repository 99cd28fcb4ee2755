//! Inject command implementation

use console::style;

use crate::cli::{GlobalOptions, InjectArgs};
use crate::engine::PatchEngine;
use crate::error::Result;
use crate::progress::OperationSpinner;

pub fn run(globals: &GlobalOptions, args: InjectArgs) -> Result<()> {
    let mut options = super::base_engine_options(globals);
    options.strategy = args.strategy;
    options.weak_reference = args.weak;
    options.prefer_main_executable = args.prefer_main_executable;

    let mut engine = PatchEngine::new(&args.bundle, options)?;
    let identifier = engine.bundle().identifier.clone();

    let spinner = OperationSpinner::start(format!(
        "Injecting {} item(s) into {identifier}",
        args.paths.len()
    ));

    match engine.inject(&args.paths, args.persist) {
        Ok(()) => {
            spinner.finish_success(format!("Injected into {identifier}"));
            for asset in engine.injected_assets() {
                println!("  {} {}", style("+").green(), asset.file_name());
            }
            if args.persist {
                println!(
                    "{}",
                    style(format!(
                        "Durable copies kept in {}",
                        engine.ledger().app_dir(&identifier).display()
                    ))
                    .dim()
                );
            }
            Ok(())
        }
        Err(e) => {
            spinner.finish_failure(format!("Injection into {identifier} failed"));
            Err(e)
        }
    }
}
