use clap::{Parser, Subcommand};
use portfolio_chat::Result;
use portfolio_chat::chat::Orchestrator;
use portfolio_chat::config::Config;
use portfolio_chat::embeddings::{Embedder, EmbeddingClient};
use portfolio_chat::generation::{AnswerGenerator, GroqClient};
use portfolio_chat::server::{self, AppState};
use portfolio_chat::store::{Retriever, VectorStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "portfolio-chat")]
#[command(about = "Retrieval-augmented chat service over a portfolio knowledge base")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Rebuild the vector index from the knowledge source
    Index,
    /// Show index readiness and the active generation model
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await?;
        }
        Commands::Index => {
            let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&config.embedding)?);
            let mut store = VectorStore::open(&config.paths.index_dir, embedder).await?;
            let count = store
                .reload(&config.paths.data_file, config.chunking)
                .await?;
            println!("Indexed {count} chunks from {}", config.paths.data_file.display());
        }
        Commands::Status => {
            let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&config.embedding)?);
            let store = VectorStore::open(&config.paths.index_dir, embedder).await?;
            let entries = store.count().await;
            println!(
                "index: {} ({} entries)",
                if store.is_ready().await { "ready" } else { "empty" },
                entries
            );
            println!("generation model: {}", config.groq.model);
            println!(
                "api key: {}",
                if config.groq.api_key.trim().is_empty() {
                    "not configured"
                } else {
                    "configured"
                }
            );
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting portfolio chat service...");

    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&config.embedding)?);
    let mut store = VectorStore::open(&config.paths.index_dir, embedder).await?;

    // Attach to persisted data, or build fresh from the knowledge source.
    // Ingestion failures leave the service running in a degraded state;
    // recovery happens through the reload endpoint.
    if store.load().await {
        info!("Using existing vector index");
    } else if config.paths.data_file.exists() {
        info!("No existing vector index found. Loading portfolio data...");
        match store.reload(&config.paths.data_file, config.chunking).await {
            Ok(count) => info!("Portfolio data loaded successfully ({count} chunks)"),
            Err(e) => error!("Failed to load portfolio data: {}", e),
        }
    } else {
        warn!(
            "Portfolio file not found: {}",
            config.paths.data_file.display()
        );
    }

    let store = Arc::new(RwLock::new(store));
    let generator = Arc::new(AnswerGenerator::new(
        Arc::new(GroqClient::new(&config.groq)),
        &config.groq,
    ));
    if !generator.is_initialized() {
        warn!("GROQ_API_KEY not set. Chat will be unavailable until it is configured.");
    }

    let retriever = Arc::new(Retriever::new(Arc::clone(&store), config.retrieval.k));
    let orchestrator = Arc::new(Orchestrator::new(retriever, Arc::clone(&generator)));

    let state = AppState::new(store, generator, orchestrator, &config);

    info!("Portfolio chat service started successfully!");
    server::serve(state, &config.server).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["portfolio-chat", "serve"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Serve { .. });
        }
    }

    #[test]
    fn serve_with_port_override() {
        let cli = Cli::try_parse_from(["portfolio-chat", "serve", "--port", "8080"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Serve { port } = parsed.command {
                assert_eq!(port, Some(8080));
            }
        }
    }

    #[test]
    fn index_command() {
        let cli = Cli::try_parse_from(["portfolio-chat", "index"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Index);
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["portfolio-chat", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["portfolio-chat", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
