use anyhow::Result;
use clap::Args;

use super::confirm;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::create_backend;

#[derive(Debug, Args)]
pub struct ClearArgs {
    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub force: bool,
}

pub async fn handle_clear(args: ClearArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let formatter = get_formatter(format);

    if !args.force && !confirm("This will delete ALL indexed chunks. Continue?")? {
        println!("{}", formatter.format_message("Cancelled."));
        return Ok(());
    }

    let store = create_backend(&config.vector_store, config.embedding.dimension as usize).await?;
    if verbose {
        eprintln!("Clearing collection {}", store.name());
    }
    store.clear().await?;

    println!(
        "{}",
        formatter.format_message("All indexed chunks have been cleared.")
    );

    Ok(())
}
