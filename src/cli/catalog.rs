//! Catalog command arguments

use clap::Args;

#[derive(Args, Debug)]
pub struct CatalogArgs {
    /// Emit machine-readable JSON
    #[arg(long)]
    pub json: bool,
}
