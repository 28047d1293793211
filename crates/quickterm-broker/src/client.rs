use std::path::Path;
use std::time::Duration;

use quickterm_core::CommandConfiguration;
use quickterm_protocol::codec::{self, FrameTransport};
use quickterm_protocol::messages::{CommandParams, QueueReply, RegisterParams};
use quickterm_protocol::methods::{COMMAND_QUEUE, EXECUTOR_REGISTER, PING};
use quickterm_protocol::{ProtocolError, ReqFrame, ResFrame};
use serde::Serialize;
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{BrokerError, Result};

/// Registration waits for the broker to connect back and run the executor
/// handshake, so it gets more time than the other calls.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to the broker socket.
pub struct BrokerClient {
    transport: FrameTransport<UnixStream>,
}

impl BrokerClient {
    /// Connect to the broker listening at `path`. Fails immediately when no
    /// broker is there; the caller decides whether to launch one.
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        debug!(path = %path.display(), "connected to broker");
        Ok(Self {
            transport: codec::framed(stream),
        })
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.call(PING, (), CALL_TIMEOUT).await?;
        Ok(())
    }

    /// Ask the broker to connect to the executor socket at `endpoint` and
    /// route queued commands there.
    pub async fn register_executor(&mut self, endpoint: &Path) -> Result<()> {
        let params = RegisterParams {
            endpoint: endpoint.display().to_string(),
        };
        self.call(EXECUTOR_REGISTER, params, REGISTER_TIMEOUT).await?;
        Ok(())
    }

    /// `Ok(false)` means the broker has no executor and dropped the command.
    pub async fn queue_command(&mut self, configuration: CommandConfiguration) -> Result<bool> {
        let res = self
            .call(COMMAND_QUEUE, CommandParams { configuration }, CALL_TIMEOUT)
            .await?;
        let reply: QueueReply = res
            .payload_as()
            .ok_or_else(|| ProtocolError::Unexpected("queue reply without payload".into()))?;
        Ok(reply.queued)
    }

    async fn call(
        &mut self,
        method: &str,
        params: impl Serialize,
        timeout: Duration,
    ) -> Result<ResFrame> {
        let req = ReqFrame::new(method, params);
        let res = tokio::time::timeout(timeout, codec::request(&mut self.transport, &req))
            .await
            .map_err(|_| BrokerError::Timeout {
                ms: timeout.as_millis() as u64,
            })??;
        if res.ok {
            return Ok(res);
        }
        let (code, message) = res
            .error
            .map(|e| (e.code, e.message))
            .unwrap_or_else(|| ("UNKNOWN".to_string(), "request failed".to_string()));
        Err(BrokerError::Remote { code, message })
    }
}
