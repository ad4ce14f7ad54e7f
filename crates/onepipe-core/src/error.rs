use thiserror::Error;

/// Errors produced by the relay core.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to listen on tcp {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to dial tcp {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pipe task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(e: tokio::task::JoinError) -> Self {
        RelayError::Task(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
