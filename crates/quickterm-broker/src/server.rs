//! Broker socket: accepts client connections and dispatches their requests.

use std::path::Path;
use std::sync::Arc;

use quickterm_core::QuicktermError;
use quickterm_protocol::codec;
use quickterm_protocol::messages::{CommandParams, QueueReply, RegisterParams};
use quickterm_protocol::methods::{COMMAND_QUEUE, EXECUTOR_REGISTER, PING};
use quickterm_protocol::{ReqFrame, ResFrame};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::error::{BrokerError, Result};

/// Bind a Unix socket at `path` with owner-only permissions.
///
/// A leftover socket file from a dead process is removed first. If another
/// process still answers on it, binding fails with `AlreadyRunning`.
pub async fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(dir) = path.parent() {
        create_private_dir(dir)?;
    }
    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            return Err(BrokerError::AlreadyRunning {
                path: path.display().to_string(),
            });
        }
        debug!(path = %path.display(), "removing stale socket");
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    set_mode(path, 0o600)?;
    info!(path = %path.display(), "listening");
    Ok(listener)
}

/// Accept clients until `shutdown` fires. Each client gets its own task.
pub async fn serve(listener: UnixListener, broker: Arc<Broker>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let broker = broker.clone();
                    tokio::spawn(handle_client(stream, broker));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
    info!("broker server stopped");
}

/// Per-client request loop. Clients normally send one request and hang up.
async fn handle_client(stream: UnixStream, broker: Arc<Broker>) {
    let conn_id = quickterm_core::ConnId::new();
    debug!(%conn_id, "client connected");
    let mut transport = codec::framed(stream);

    while let Some(frame) = codec::next_frame(&mut transport).await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(quickterm_protocol::ProtocolError::Malformed(e)) => {
                warn!(%conn_id, error = %e, "malformed frame");
                continue;
            }
            Err(e) => {
                warn!(%conn_id, error = %e, "client connection failed");
                break;
            }
        };
        let Some(req) = frame.as_req() else {
            debug!(%conn_id, frame_type = %frame.frame_type, "ignoring non-request frame");
            continue;
        };
        let res = dispatch(&broker, &req).await;
        if codec::send_json(&mut transport, &res).await.is_err() {
            break;
        }
    }
    debug!(%conn_id, "client disconnected");
}

/// Route one request to the broker.
pub async fn dispatch(broker: &Arc<Broker>, req: &ReqFrame) -> ResFrame {
    match req.method.as_str() {
        PING => ResFrame::ok(&req.id, serde_json::json!({ "pong": true })),

        EXECUTOR_REGISTER => {
            let Some(params) = req.params_as::<RegisterParams>() else {
                return error_res(req, QuicktermError::Protocol("missing endpoint".into()));
            };
            match broker.register(&params.endpoint).await {
                Ok(()) => ResFrame::ok(&req.id, serde_json::json!({ "registered": true })),
                Err(e) => error_res(req, e),
            }
        }

        COMMAND_QUEUE => {
            let Some(params) = req.params_as::<CommandParams>() else {
                return error_res(req, QuicktermError::Protocol("missing configuration".into()));
            };
            if let Err(e) = params.configuration.validate() {
                return error_res(req, e);
            }
            let queued = broker.queue_command(params.configuration).await;
            ResFrame::ok(&req.id, QueueReply { queued })
        }

        other => error_res(
            req,
            QuicktermError::MethodNotFound {
                method: other.to_string(),
            },
        ),
    }
}

fn error_res(req: &ReqFrame, e: QuicktermError) -> ResFrame {
    ResFrame::err(&req.id, e.code(), &e.to_string())
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        set_mode(dir, 0o700)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
