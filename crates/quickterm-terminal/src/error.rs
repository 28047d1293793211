//! Error types for the quickterm-terminal crate.

use thiserror::Error;

/// All errors that can originate from session execution.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// The child process could not be launched (bad shell, missing working
    /// directory, permission denied, …).
    #[error("spawn failed for `{shell}`: {reason}")]
    Spawn { shell: String, reason: String },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TerminalError>;
