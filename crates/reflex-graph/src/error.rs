use reflex_providers::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("invalid graph configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Model(#[from] ProviderError),
    #[error("could not decode {function} output: {reason}")]
    StructuredOutput { function: String, reason: String },
}
