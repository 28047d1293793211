use thiserror::Error;

use quickterm_protocol::ProtocolError;

/// Errors raised by the broker server and by [`BrokerClient`](crate::BrokerClient).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Another process already answers on the socket path.
    #[error("another process is listening on {path}")]
    AlreadyRunning { path: String },

    /// The broker answered with `ok: false`.
    #[error("broker returned {code}: {message}")]
    Remote { code: String, message: String },

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Wire-level code, matching the codes used in RES frames.
    pub fn code(&self) -> &str {
        match self {
            BrokerError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            BrokerError::Remote { code, .. } => code.as_str(),
            BrokerError::Timeout { .. } => "TIMEOUT",
            BrokerError::Protocol(_) => "PROTOCOL_ERROR",
            BrokerError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
