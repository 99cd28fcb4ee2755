//! List command implementation

use console::style;
use serde_json::json;

use crate::bundle::AppBundle;
use crate::cli::{GlobalOptions, ListArgs};
use crate::error::Result;
use crate::ledger::{PersistenceLedger, classify_assets};

pub fn run(globals: &GlobalOptions, args: ListArgs) -> Result<()> {
    let bundle = AppBundle::open(&args.bundle)?;
    let injected = classify_assets(&bundle.injected_assets());

    let ledger = PersistenceLedger::new(
        globals
            .store_root
            .clone()
            .unwrap_or_else(PersistenceLedger::default_root),
    );
    let persisted = if args.persisted {
        ledger.persisted_assets(&bundle.identifier)
    } else {
        Vec::new()
    };

    if args.json {
        let payload = json!({
            "identifier": bundle.identifier,
            "injected": injected.iter().map(|asset| json!({
                "name": asset.file_name(),
                "kind": asset.kind.as_str(),
                "path": asset.path.display().to_string(),
            })).collect::<Vec<_>>(),
            "persisted": persisted.iter().map(|asset| json!({
                "name": asset.file_name(),
                "kind": asset.kind.as_str(),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload).expect("valid json"));
        return Ok(());
    }

    println!("{}", style(&bundle.identifier).bold());
    if injected.is_empty() {
        println!("  {}", style("no injected plug-ins").dim());
    }
    for asset in &injected {
        println!(
            "  {} {} {}",
            style("●").green(),
            asset.file_name(),
            style(format!("({})", asset.kind.as_str())).dim()
        );
    }

    if args.persisted {
        println!("{}", style("Persisted:").bold());
        if persisted.is_empty() {
            println!("  {}", style("none").dim());
        }
        for asset in &persisted {
            println!(
                "  {} {} {}",
                style("○").cyan(),
                asset.file_name(),
                style(format!("({})", asset.kind.as_str())).dim()
            );
        }
    }
    Ok(())
}
