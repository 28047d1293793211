//! quickterm-broker: the long-lived relay between short-lived clients and
//! the one daemon that executes commands.
//!
//! Clients connect to the broker socket and send `executor.register` or
//! `command.queue` requests. The broker keeps at most one executor
//! registration at a time (see [`Broker`]) and forwards queued commands to it.

pub mod broker;
pub mod client;
pub mod error;
pub mod server;

pub use broker::Broker;
pub use client::BrokerClient;
pub use error::{BrokerError, Result};
