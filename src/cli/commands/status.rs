use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat, VectorDriver};
use crate::services::{OpenAiEmbedder, create_backend, create_tokenizer};

pub async fn handle_status(format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let formatter = get_formatter(format);

    let (embedding_connected, embedding_error) = match OpenAiEmbedder::new(&config.embedding) {
        Ok(embedder) => match embedder.health_check().await {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        },
        Err(e) => (false, Some(e.to_string())),
    };

    let tokenizer = match create_tokenizer(&config.indexing) {
        Ok(counter) => counter.name().to_string(),
        Err(e) => format!("unavailable ({})", e),
    };

    let location = match config.vector_store.driver {
        VectorDriver::Qdrant => config.vector_store.url.clone(),
        VectorDriver::Local => config
            .vector_store
            .local_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(unknown)".to_string()),
    };

    let (connected, points, repositories) =
        match create_backend(&config.vector_store, config.embedding.dimension as usize).await {
            Ok(store) => {
                let connected = store.health_check().await.unwrap_or(false);
                if connected {
                    let points = store.count().await.unwrap_or(0);
                    let repos = store.list_repositories().await.map_or(0, |r| r.len());
                    (true, points, repos)
                } else {
                    (false, 0, 0)
                }
            }
            Err(e) => {
                if verbose {
                    eprintln!("Vector store error: {}", e);
                }
                (false, 0, 0)
            }
        };

    let status = StatusInfo {
        embedding_url: config.embedding.url.clone(),
        embedding_model: config.embedding.model.clone(),
        embedding_connected,
        embedding_error,
        tokenizer,
        vector_store_driver: config.vector_store.driver.to_string(),
        vector_store_location: location,
        vector_store_connected: connected,
        vector_store_points: points,
        collection: config.vector_store.collection.clone(),
        repositories,
    };

    print!("{}", formatter.format_status(&status));

    if !embedding_connected || !connected {
        eprintln!();
        if config.embedding.api_key.is_none() {
            eprintln!("Hint: set OPENAI_API_KEY or embedding.api_key in the config file.");
        }
        if !connected && config.vector_store.driver == VectorDriver::Qdrant {
            eprintln!("Warning: Qdrant not running. Start with: docker-compose up -d qdrant");
            eprintln!("         Or set vector_store.driver = \"local\" to use a local file.");
        }
    }

    Ok(())
}
