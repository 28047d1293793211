//! quickterm-terminal: runs one user command per [`TerminalSession`].
//!
//! A session launches `<shell> -c <command>`, captures stdout and stderr as
//! they arrive, enforces the configured timeout and drives the
//! active/inactive visibility state that the session manager reacts to.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use quickterm_core::CommandConfiguration;
//! use quickterm_terminal::{SessionEventKind, TerminalSession};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cfg = CommandConfiguration::new("/tmp", "echo hello").with_shell("sh");
//!     let session = TerminalSession::new(cfg);
//!     let mut events = session.subscribe();
//!     session.start().unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         if let SessionEventKind::Finished { exit_code, .. } = event.kind {
//!             println!("exit {exit_code}: {}", session.output());
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod error;
pub mod session;
pub mod types;

pub use error::{Result, TerminalError};
pub use session::TerminalSession;
pub use types::{OutputStream, SessionEvent, SessionEventKind, SessionId, SessionSnapshot};
