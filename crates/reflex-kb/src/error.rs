use reflex_providers::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KbError {
    #[error("knowledge base not found: {0}")]
    NotFound(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to read csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("search failed: {0}")]
    Search(String),
    #[error(transparent)]
    Model(#[from] ProviderError),
}
