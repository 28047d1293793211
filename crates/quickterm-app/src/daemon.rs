//! The long-lived daemon: executes forwarded commands and keeps itself
//! registered with the broker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quickterm_broker::BrokerError;
use quickterm_core::config::REGISTER_RETRY_MS;
use quickterm_core::QuicktermConfig;
use quickterm_sessions::TerminalSessionManager;
use quickterm_terminal::TerminalSession;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::{self, CommandExecutor, LinkEnd};
use crate::{launcher, presenter};

/// Run until SIGINT/SIGTERM.
pub async fn run(config: QuicktermConfig) -> anyhow::Result<()> {
    let socket = config.ipc.executor_socket();
    let listener = match quickterm_broker::server::bind(&socket).await {
        Ok(listener) => listener,
        Err(BrokerError::AlreadyRunning { .. }) => anyhow::bail!("Daemon is already running"),
        Err(e) => {
            return Err(e).with_context(|| format!("cannot bind {}", socket.display()));
        }
    };
    info!(socket = %socket.display(), "daemon started");

    let manager = TerminalSessionManager::new();
    tokio::spawn(presenter::run(manager.clone()));

    let executor = Arc::new(CommandExecutor::new({
        let manager = manager.clone();
        move |configuration| manager.schedule(TerminalSession::new(configuration))
    }));

    let shutdown = CancellationToken::new();
    let (links_tx, links_rx) = mpsc::unbounded_channel();
    tokio::spawn(executor::serve(listener, executor, links_tx, shutdown.clone()));
    tokio::spawn(keep_registered(
        config.clone(),
        socket.clone(),
        links_rx,
        shutdown.clone(),
    ));

    wait_for_shutdown_signal().await?;
    info!("shutting down daemon");
    shutdown.cancel();
    remove_socket(&socket);
    Ok(())
}

/// Register with the broker and re-register whenever the link drops.
/// Stops for good once a newer daemon evicts this one.
async fn keep_registered(
    config: QuicktermConfig,
    executor_socket: PathBuf,
    mut links: mpsc::UnboundedReceiver<LinkEnd>,
    shutdown: CancellationToken,
) {
    let retry = Duration::from_millis(REGISTER_RETRY_MS);
    loop {
        match register(&config, &executor_socket).await {
            Ok(()) => {
                info!("registered with broker");
                let own = executor_socket.display().to_string();
                loop {
                    let end = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        end = links.recv() => end,
                    };
                    match end {
                        // Our own re-registration replaced an older link.
                        Some(LinkEnd::Evicted { replaced_by }) if replaced_by == own => continue,
                        Some(LinkEnd::Evicted { replaced_by }) => {
                            warn!(%replaced_by, "replaced by a newer daemon, no longer registering");
                            return;
                        }
                        Some(LinkEnd::Lost) => {
                            warn!("broker link lost, registering again");
                            break;
                        }
                        None => return,
                    }
                }
            }
            Err(e) => warn!(error = %e, "broker registration failed"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

async fn register(config: &QuicktermConfig, executor_socket: &Path) -> anyhow::Result<()> {
    let mut client = launcher::ensure_broker(&config.ipc).await?;
    client.register_executor(executor_socket).await?;
    Ok(())
}

fn remove_socket(socket: &Path) {
    if let Err(e) = std::fs::remove_file(socket) {
        warn!(path = %socket.display(), error = %e, "could not remove executor socket");
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
