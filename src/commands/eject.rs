//! Eject command implementation

use std::io::IsTerminal;

use crate::cli::{EjectArgs, GlobalOptions};
use crate::engine::PatchEngine;
use crate::error::Result;
use crate::progress::OperationSpinner;

pub fn run(globals: &GlobalOptions, args: EjectArgs) -> Result<()> {
    let options = super::base_engine_options(globals);
    let mut engine = PatchEngine::new(&args.bundle, options)?;
    let identifier = engine.bundle().identifier.clone();

    if args.all && !args.yes && std::io::stdin().is_terminal() {
        let confirmed = inquire::Confirm::new(&format!(
            "Eject every injected plug-in from {identifier}?"
        ))
        .with_default(false)
        .prompt()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let spinner = OperationSpinner::start(format!("Ejecting plug-ins from {identifier}"));
    let result = if args.all {
        engine.eject_all(args.desist)
    } else {
        engine.eject(&args.paths, args.desist)
    };

    match result {
        Ok(()) => {
            spinner.finish_success(format!("Ejected from {identifier}"));
            Ok(())
        }
        Err(e) => {
            spinner.finish_failure(format!("Ejection from {identifier} failed"));
            Err(e)
        }
    }
}
