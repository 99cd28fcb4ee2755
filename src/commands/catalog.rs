//! Catalog command implementation

use console::style;
use serde_json::json;

use crate::catalog::{CatalogOrigin, LibraryCatalog, LibraryKind};
use crate::cli::{CatalogArgs, GlobalOptions};
use crate::error::Result;

pub fn run(globals: &GlobalOptions, args: CatalogArgs) -> Result<()> {
    let builtin_root = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(std::path::Path::to_path_buf));
    let user_root = globals.library_root.clone().or_else(|| {
        dirs::data_dir().map(|d| d.join("trollfools").join("libraries"))
    });

    let catalog = LibraryCatalog::scan(builtin_root.as_deref(), user_root.as_deref());

    if args.json {
        let payload: Vec<_> = catalog
            .entries()
            .iter()
            .map(|entry| {
                json!({
                    "key": entry.key,
                    "kind": match entry.kind {
                        LibraryKind::Framework => "framework",
                        LibraryKind::Dylib => "dylib",
                    },
                    "origin": match entry.origin {
                        CatalogOrigin::Builtin => "builtin",
                        CatalogOrigin::User => "user",
                    },
                    "archive": entry.archive.display().to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload).expect("valid json"));
        return Ok(());
    }

    if catalog.entries().is_empty() {
        println!("{}", style("no catalog entries found").dim());
        return Ok(());
    }

    for entry in catalog.entries() {
        let origin = match entry.origin {
            CatalogOrigin::Builtin => style("builtin").dim(),
            CatalogOrigin::User => style("user").cyan(),
        };
        println!("{} [{}] {}", entry.item_name(), origin, style(entry.archive.display()).dim());
    }
    Ok(())
}
