use thiserror::Error;

/// Failure while talking to an upstream model server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),
    #[error("rate limit reached: {0}")]
    RateLimit(String),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl InvokeError {
    /// Classify an upstream HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => InvokeError::Authorization(body),
            429 => InvokeError::RateLimit(body),
            500..=599 => InvokeError::ServerUnavailable(body),
            _ => InvokeError::BadRequest(body),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InvokeError::Connection(_) => "connection",
            InvokeError::ServerUnavailable(_) => "server_unavailable",
            InvokeError::RateLimit(_) => "rate_limit",
            InvokeError::Authorization(_) => "authorization",
            InvokeError::BadRequest(_) => "bad_request",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request itself is invalid (bad parameters, empty input, ...).
    #[error("{0}")]
    Value(String),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("provider not found: {0}")]
    UnknownProvider(String),
    #[error("model not found: {0}")]
    UnknownModel(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return InvokeError::from_status(status.as_u16(), err.to_string()).into();
        }
        InvokeError::Connection(err.to_string()).into()
    }
}
