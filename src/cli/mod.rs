//! Command-line interface.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Index GitHub repositories into a vector store and search them.
#[derive(Debug, Parser)]
#[command(name = "repo-search")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Chunk, embed and store a repository checkout
    Index(commands::IndexArgs),

    /// Search indexed content
    Search(commands::SearchArgs),

    /// List or delete indexed repositories
    #[command(subcommand)]
    Repos(commands::ReposCommand),

    /// Delete every indexed chunk
    Clear(commands::ClearArgs),

    /// Check the embedding endpoint and vector store
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
