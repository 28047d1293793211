//! quickterm-sessions: decides which sessions are presented and when they go.
//!
//! [`TerminalSessionManager`] starts scheduled sessions, keeps the ordered
//! list of presented sessions and defers removals while the user is reading
//! (see [`TerminalSessionManager::pause_removal`]). [`Queue`] is the FIFO the
//! deferred removals wait in.

pub mod manager;
pub mod queue;

pub use manager::{ManagerEvent, TerminalSessionManager};
pub use queue::Queue;
