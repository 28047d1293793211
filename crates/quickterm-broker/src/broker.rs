use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use std::time::Duration;

use quickterm_core::config::HANDSHAKE_TIMEOUT_MS;
use quickterm_core::{CommandConfiguration, QuicktermError};
use quickterm_protocol::codec::{self, FrameTransport};
use quickterm_protocol::messages::{CommandParams, EvictedNotice, ExecutorHello, HelloParams};
use quickterm_protocol::methods::{COMMAND_EXECUTE, EVENT_EXECUTOR_EVICTED, EXECUTOR_HELLO};
use quickterm_protocol::{EventFrame, ReqFrame};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Registration slot. Replaced as a whole, never patched field by field.
enum BrokerState {
    NoExecutor,
    ExecutorRegistered(ExecutorHandle),
}

/// The broker's side of one live executor connection.
struct ExecutorHandle {
    generation: u64,
    endpoint: String,
    outbox: mpsc::UnboundedSender<Outbound>,
}

/// Work for the task that owns the executor connection.
enum Outbound {
    Execute(CommandConfiguration),
    /// Tell the executor it was replaced, then hang up.
    Evict { replaced_by: String },
}

/// Why an executor connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    /// Peer closed the socket.
    Interrupted,
    /// Read/write failure; the connection is unusable.
    Invalidated,
    /// A newer registration took over.
    Evicted,
}

/// Relay state: at most one registered executor.
pub struct Broker {
    state: Mutex<BrokerState>,
    next_generation: AtomicU64,
    handshake_timeout: Duration,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Self::with_handshake_timeout(Duration::from_millis(HANDSHAKE_TIMEOUT_MS))
    }

    pub fn with_handshake_timeout(handshake_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState::NoExecutor),
            next_generation: AtomicU64::new(1),
            handshake_timeout,
        })
    }

    /// Connect to the executor listening at `endpoint` and make it the only
    /// registered executor.
    ///
    /// The endpoint must answer `executor.hello` with a compatible hello
    /// within the handshake timeout. On failure the current registration (if
    /// any) is left untouched. On success the previous executor is sent
    /// `executor.evicted` and disconnected.
    pub async fn register(self: &Arc<Self>, endpoint: &str) -> quickterm_core::Result<()> {
        let stream = UnixStream::connect(endpoint).await.map_err(|e| {
            warn!(endpoint, error = %e, "executor endpoint unreachable");
            QuicktermError::ExecutorUnreachable(format!("{endpoint}: {e}"))
        })?;
        let mut transport = codec::framed(stream);
        self.handshake(endpoint, &mut transport).await?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (outbox, rx) = mpsc::unbounded_channel();
        let handle = ExecutorHandle {
            generation,
            endpoint: endpoint.to_string(),
            outbox,
        };

        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, BrokerState::ExecutorRegistered(handle));
        if let BrokerState::ExecutorRegistered(old) = previous {
            info!(
                old = %old.endpoint,
                new = endpoint,
                generation = old.generation,
                "evicting previous executor"
            );
            // The old connection task may already be gone; nothing left to evict then.
            let _ = old.outbox.send(Outbound::Evict {
                replaced_by: endpoint.to_string(),
            });
        }
        tokio::spawn(run_connection(
            Arc::downgrade(self),
            generation,
            endpoint.to_string(),
            transport,
            rx,
        ));
        drop(state);

        info!(endpoint, generation, "executor registered");
        Ok(())
    }

    async fn handshake(
        &self,
        endpoint: &str,
        transport: &mut FrameTransport<UnixStream>,
    ) -> quickterm_core::Result<()> {
        let req = ReqFrame::new(EXECUTOR_HELLO, HelloParams::broker());
        let res = tokio::time::timeout(self.handshake_timeout, codec::request(transport, &req))
            .await
            .map_err(|_| {
                warn!(endpoint, "executor did not answer hello in time");
                QuicktermError::ExecutorRejected(format!(
                    "{endpoint}: no hello within {}ms",
                    self.handshake_timeout.as_millis()
                ))
            })?
            .map_err(|e| {
                warn!(endpoint, error = %e, "executor handshake failed");
                QuicktermError::ExecutorRejected(format!("{endpoint}: {e}"))
            })?;

        match res.payload_as::<ExecutorHello>() {
            Some(hello) if res.ok && hello.is_compatible() => Ok(()),
            _ => {
                warn!(endpoint, "endpoint does not speak the executor interface");
                Err(QuicktermError::ExecutorRejected(format!(
                    "{endpoint}: not a compatible executor"
                )))
            }
        }
    }

    /// Forward `configuration` to the registered executor.
    ///
    /// Returns `false` right away when no executor is registered; the command
    /// is dropped. `true` means the command was handed to the executor
    /// connection, not that it ran.
    pub async fn queue_command(&self, configuration: CommandConfiguration) -> bool {
        let mut state = self.state.lock().await;
        let BrokerState::ExecutorRegistered(handle) = &*state else {
            debug!("no executor registered, command dropped");
            return false;
        };
        if handle.outbox.send(Outbound::Execute(configuration)).is_ok() {
            debug!(generation = handle.generation, "command forwarded");
            return true;
        }
        // Connection task already exited; the slot is stale.
        warn!(generation = handle.generation, "executor connection gone, clearing registration");
        *state = BrokerState::NoExecutor;
        false
    }

    /// Endpoint of the registered executor, if any.
    pub async fn current_executor(&self) -> Option<String> {
        match &*self.state.lock().await {
            BrokerState::NoExecutor => None,
            BrokerState::ExecutorRegistered(handle) => Some(handle.endpoint.clone()),
        }
    }

    /// Return to `NoExecutor`, unless a newer registration already replaced
    /// the connection identified by `generation`.
    async fn clear_if_current(&self, generation: u64, reason: Disconnect) {
        let mut state = self.state.lock().await;
        match &*state {
            BrokerState::ExecutorRegistered(handle) if handle.generation == generation => {
                info!(endpoint = %handle.endpoint, generation, ?reason, "executor disconnected");
                *state = BrokerState::NoExecutor;
            }
            _ => debug!(generation, ?reason, "stale executor connection closed"),
        }
    }
}

/// Owns one executor connection: writes forwarded commands, watches for EOF.
async fn run_connection(
    broker: Weak<Broker>,
    generation: u64,
    endpoint: String,
    mut transport: FrameTransport<UnixStream>,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
) {
    let reason = loop {
        tokio::select! {
            msg = outbox.recv() => match msg {
                Some(Outbound::Execute(configuration)) => {
                    let req = ReqFrame::new(COMMAND_EXECUTE, CommandParams { configuration });
                    if let Err(e) = codec::send_json(&mut transport, &req).await {
                        warn!(%endpoint, error = %e, "forwarding command failed");
                        break Disconnect::Invalidated;
                    }
                }
                Some(Outbound::Evict { replaced_by }) => {
                    let ev = EventFrame::new(EVENT_EXECUTOR_EVICTED, EvictedNotice { replaced_by });
                    if let Err(e) = codec::send_json(&mut transport, &ev).await {
                        debug!(%endpoint, error = %e, "could not notify evicted executor");
                    }
                    break Disconnect::Evicted;
                }
                // Broker dropped.
                None => break Disconnect::Invalidated,
            },

            frame = codec::next_frame(&mut transport) => match frame {
                None => break Disconnect::Interrupted,
                Some(Err(e)) => {
                    warn!(%endpoint, error = %e, "executor connection failed");
                    break Disconnect::Invalidated;
                }
                Some(Ok(frame)) => {
                    debug!(%endpoint, frame_type = %frame.frame_type, "ignoring frame from executor");
                }
            },
        }
    };

    if let Some(broker) = broker.upgrade() {
        broker.clear_if_current(generation, reason).await;
    }
}
