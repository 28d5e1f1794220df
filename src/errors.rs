/// Domain-specific error types for the odds engine.
/// Invalid inputs are rejected where values are constructed. Numerical
/// failures inside a batch are contained by the batch driver and never
/// reach the caller as anything other than an empty response.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model computation error: {0}")]
    Model(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_panic() {
            EngineError::Worker(format!("batch task panicked: {e}"))
        } else {
            EngineError::Worker(format!("batch task cancelled: {e}"))
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
