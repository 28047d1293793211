use thiserror::Error;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line could not be parsed as a frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Line framing failed: oversized line or socket I/O error.
    #[error("codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// The peer closed the connection before answering.
    #[error("connection closed by peer")]
    Closed,

    /// A frame arrived that is valid JSON but not what the exchange expects.
    #[error("unexpected frame: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
