use thiserror::Error;

pub type Result<T> = std::result::Result<T, PortfolioError>;

#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("Source file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse knowledge source: {0}")]
    Parse(String),

    #[error("Vector index not initialized")]
    NotInitialized,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Reload token mismatch")]
    Auth,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chat;
pub mod config;
pub mod embeddings;
pub mod generation;
pub mod ingest;
pub mod server;
pub mod store;
