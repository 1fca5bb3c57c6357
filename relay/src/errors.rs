use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("remote endpoint throttled the request: {0}")]
    Throttled(String),
    #[error("network request failed: {0}")]
    Network(String),
    #[error("remote endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("dispatch cancelled")]
    Cancelled,
}

impl RelayError {
    /// Transient failures are retried with backoff; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Throttled(_)
                | RelayError::Network(_)
                | RelayError::Status { .. }
                | RelayError::Timeout(_)
        )
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, RelayError::Throttled(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
