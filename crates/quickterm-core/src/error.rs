use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuicktermError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid command configuration: {0}")]
    InvalidCommand(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Executor rejected: {0}")]
    ExecutorRejected(String),

    #[error("Executor unreachable: {0}")]
    ExecutorUnreachable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuicktermError {
    /// Short error code string sent to peers in RES frames.
    pub fn code(&self) -> &'static str {
        match self {
            QuicktermError::Config(_) => "CONFIG_ERROR",
            QuicktermError::InvalidCommand(_) => "INVALID_COMMAND",
            QuicktermError::Protocol(_) => "PROTOCOL_ERROR",
            QuicktermError::MethodNotFound { .. } => "METHOD_NOT_FOUND",
            QuicktermError::ExecutorRejected(_) => "EXECUTOR_REJECTED",
            QuicktermError::ExecutorUnreachable(_) => "EXECUTOR_UNREACHABLE",
            QuicktermError::Serialization(_) => "SERIALIZATION_ERROR",
            QuicktermError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, QuicktermError>;
