use thiserror::Error;

pub type Result<T> = std::result::Result<T, StageClientError>;

#[derive(Debug, Error)]
pub enum StageClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl StageClientError {
    /// Worth retrying: connection problems, timeouts, rate limits, and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            StageClientError::Network(_) | StageClientError::Timeout => true,
            StageClientError::Api { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            StageClientError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for StageClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StageClientError::Timeout
        } else if err.is_decode() {
            StageClientError::Parse(err.to_string())
        } else {
            StageClientError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StageClientError {
    fn from(err: serde_json::Error) -> Self {
        StageClientError::Parse(err.to_string())
    }
}
