//! Typed payloads carried in `params` / `payload` of the frames.

use quickterm_core::config::PROTOCOL_VERSION;
use quickterm_core::CommandConfiguration;
use serde::{Deserialize, Serialize};

/// Role string a conforming executor reports in its hello.
pub const EXECUTOR_ROLE: &str = "executor";

/// `executor.register` params: where the broker should connect back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterParams {
    pub endpoint: String,
}

/// `command.queue` params (client → broker) and `command.execute` params
/// (broker → executor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    pub configuration: CommandConfiguration,
}

/// `command.queue` reply payload.
///
/// `queued` means "accepted for forwarding to the executor", never "ran
/// successfully".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueReply {
    pub queued: bool,
}

/// Who is sending `executor.hello`.
pub const PEER_BROKER: &str = "broker";
pub const PEER_CLIENT: &str = "client";

/// `executor.hello` params. Lets the executor tell the broker link apart
/// from discovery probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloParams {
    pub peer: String,
}

impl HelloParams {
    pub fn broker() -> Self {
        Self {
            peer: PEER_BROKER.to_string(),
        }
    }

    pub fn client() -> Self {
        Self {
            peer: PEER_CLIENT.to_string(),
        }
    }

    pub fn is_broker(&self) -> bool {
        self.peer == PEER_BROKER
    }
}

/// `executor.hello` reply payload: proves the endpoint speaks the executor interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorHello {
    pub role: String,
    pub protocol: u32,
}

impl ExecutorHello {
    pub fn current() -> Self {
        Self {
            role: EXECUTOR_ROLE.to_string(),
            protocol: PROTOCOL_VERSION,
        }
    }

    /// Same role and a protocol version this build understands.
    pub fn is_compatible(&self) -> bool {
        self.role == EXECUTOR_ROLE && self.protocol == PROTOCOL_VERSION
    }
}

/// `executor.evicted` event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictedNotice {
    /// Endpoint of the executor that replaced the receiver.
    pub replaced_by: String,
}
