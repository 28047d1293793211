//! quickterm-core: shared types, configuration and errors.
//!
//! Every other crate in the workspace depends on this one. It owns the
//! [`CommandConfiguration`] value that travels from the client, through the
//! broker, to the daemon, as well as the figment-backed user configuration.

pub mod command;
pub mod config;
pub mod error;
pub mod types;

pub use command::CommandConfiguration;
pub use config::QuicktermConfig;
pub use error::{QuicktermError, Result};
pub use types::ConnId;
