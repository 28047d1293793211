//! Daemon side of the relay: the executor socket the broker connects to.

use std::sync::Arc;

use quickterm_core::CommandConfiguration;
use quickterm_protocol::codec;
use quickterm_protocol::messages::{CommandParams, EvictedNotice, ExecutorHello, HelloParams};
use quickterm_protocol::methods::{COMMAND_EXECUTE, EVENT_EXECUTOR_EVICTED, EXECUTOR_HELLO};
use quickterm_protocol::{InboundFrame, ResFrame};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hands every forwarded configuration to one callback.
///
/// Invocations may arrive from several connection tasks at once; each one
/// corresponds to exactly one `command.queue` accepted by the broker.
pub struct CommandExecutor {
    on_command: Box<dyn Fn(CommandConfiguration) + Send + Sync>,
}

impl CommandExecutor {
    pub fn new(on_command: impl Fn(CommandConfiguration) + Send + Sync + 'static) -> Self {
        Self {
            on_command: Box::new(on_command),
        }
    }

    pub fn execute(&self, configuration: CommandConfiguration) {
        (self.on_command)(configuration);
    }
}

/// How a broker link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEnd {
    /// Connection dropped; registering again is worthwhile.
    Lost,
    /// Another registration took the slot; `replaced_by` is its endpoint.
    Evicted { replaced_by: String },
}

/// Accept broker links and discovery probes until `shutdown` fires.
///
/// Every ended broker link is reported on `links`.
pub async fn serve(
    listener: UnixListener,
    executor: Arc<CommandExecutor>,
    links: mpsc::UnboundedSender<LinkEnd>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, executor.clone(), links.clone()));
                }
                Err(e) => warn!(error = %e, "executor accept failed"),
            },
        }
    }
    debug!("executor listener stopped");
}

async fn handle_connection(
    stream: UnixStream,
    executor: Arc<CommandExecutor>,
    links: mpsc::UnboundedSender<LinkEnd>,
) {
    let mut transport = codec::framed(stream);
    let mut from_broker = false;
    let mut evicted = None;

    while let Some(frame) = codec::next_frame(&mut transport).await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "executor connection failed");
                break;
            }
        };
        match handle_frame(&frame, &executor, from_broker) {
            Inbound::Hello { id, broker } => {
                from_broker |= broker;
                let res = ResFrame::ok(id, ExecutorHello::current());
                if codec::send_json(&mut transport, &res).await.is_err() {
                    break;
                }
            }
            Inbound::Evicted { replaced_by } => {
                evicted = Some(replaced_by);
            }
            Inbound::Handled => {}
        }
    }

    if from_broker {
        let end = match evicted {
            Some(replaced_by) => LinkEnd::Evicted { replaced_by },
            None => LinkEnd::Lost,
        };
        info!(?end, "broker link closed");
        let _ = links.send(end);
    }
}

/// Outcome of one inbound frame that the connection loop has to act on.
enum Inbound {
    Hello { id: String, broker: bool },
    Evicted { replaced_by: String },
    Handled,
}

fn handle_frame(frame: &InboundFrame, executor: &CommandExecutor, from_broker: bool) -> Inbound {
    if let Some(req) = frame.as_req() {
        match req.method.as_str() {
            EXECUTOR_HELLO => {
                let broker = req
                    .params_as::<HelloParams>()
                    .is_some_and(|p| p.is_broker());
                debug!(broker, "answering executor hello");
                return Inbound::Hello { id: req.id, broker };
            }
            COMMAND_EXECUTE if from_broker => match req.params_as::<CommandParams>() {
                Some(params) => {
                    info!(command = %params.configuration.command(), "command received");
                    executor.execute(params.configuration);
                }
                None => warn!("command.execute without a configuration"),
            },
            COMMAND_EXECUTE => warn!("command.execute from a peer that is not the broker"),
            other => debug!(method = other, "ignoring request"),
        }
    } else if let Some(ev) = frame.as_event() {
        if ev.event == EVENT_EXECUTOR_EVICTED {
            let replaced_by = ev
                .payload
                .and_then(|p| serde_json::from_value::<EvictedNotice>(p).ok())
                .map(|notice| notice.replaced_by)
                .unwrap_or_default();
            info!(%replaced_by, "executor registration replaced");
            return Inbound::Evicted { replaced_by };
        }
    }
    Inbound::Handled
}
