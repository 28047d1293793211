//! Shared data types for quickterm-terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Opaque identity of a terminal session. Two sessions are equal iff their
/// ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh random session ID (UUIDv4).
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle events
// ---------------------------------------------------------------------------

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// What happened to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionEventKind {
    /// The child process was launched.
    Started,

    /// A decoded chunk was appended to the buffers.
    Output { stream: OutputStream, text: String },

    /// The session became visible (`true`) or eligible for removal (`false`).
    ActiveChanged { active: bool },

    /// The child exited; buffers are complete.
    Finished { exit_code: i32, success: bool },
}

/// One lifecycle event, tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// Owned, point-in-time view of a session for presenters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub command: String,
    pub is_running: bool,
    pub has_finished: bool,
    pub is_active: bool,
    /// Only meaningful once `has_finished` is true.
    pub exit_code: Option<i32>,
    pub was_successful: bool,
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_time: Option<DateTime<Utc>>,
}
