use anyhow::Result;
use clap::Subcommand;

use super::confirm;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, RepositoryId};
use crate::services::create_backend;

#[derive(Debug, Subcommand)]
pub enum ReposCommand {
    /// List indexed repositories
    List,

    /// Remove a repository's chunks and record from the index
    Delete {
        /// Repository in owner/name form
        repository: String,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },
}

pub async fn handle_repos(cmd: ReposCommand, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let formatter = get_formatter(format);
    let store = create_backend(&config.vector_store, config.embedding.dimension as usize).await?;

    match cmd {
        ReposCommand::List => {
            let repos = store.list_repositories().await?;
            print!("{}", formatter.format_repositories(&repos));
        }
        ReposCommand::Delete { repository, force } => {
            let repository: RepositoryId = repository.parse()?;
            let name = repository.full_name();

            if !force && !confirm(&format!("Delete all indexed chunks of {}?", name))? {
                println!("{}", formatter.format_message("Cancelled."));
                return Ok(());
            }

            if verbose {
                eprintln!("Deleting {} from {}", name, store.name());
            }
            if !store.delete_repository(&name).await? {
                anyhow::bail!("{} is not indexed in {}", name, store.name());
            }
            println!(
                "{}",
                formatter.format_message(&format!("Deleted {} from the index", name))
            );
        }
    }

    Ok(())
}
