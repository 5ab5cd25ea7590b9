use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use repo_search::cli::commands::{
    handle_clear, handle_config, handle_index, handle_repos, handle_search, handle_status,
};
use repo_search::cli::output::get_formatter;
use repo_search::cli::{Cli, Commands};
use repo_search::models::{Config, OutputFormat};

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("warn,repo_search=info")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let format = match cli.format {
        Some(format) => format,
        None => Config::load()
            .map(|resolved| resolved.config.search.default_format)
            .unwrap_or_default(),
    };
    let verbose = cli.verbose;

    let cancel = CancellationToken::new();
    let run = run_command(cli.command, format, verbose, cancel.clone());
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, finishing in-flight work...");
            cancel.cancel();
            run.await
        }
    };

    if let Err(e) = result {
        eprint!("{}", get_formatter(format).format_error(&format!("{:#}", e)));
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command(
    command: Commands,
    format: OutputFormat,
    verbose: bool,
    cancel: CancellationToken,
) -> Result<()> {
    match command {
        Commands::Index(args) => handle_index(args, format, verbose, cancel).await,
        Commands::Search(args) => handle_search(args, format, verbose).await,
        Commands::Repos(cmd) => handle_repos(cmd, format, verbose).await,
        Commands::Clear(args) => handle_clear(args, format, verbose).await,
        Commands::Status => handle_status(format, verbose).await,
        Commands::Config(cmd) => handle_config(cmd, format, verbose).await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
