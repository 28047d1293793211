use std::path::PathBuf;

use clap::Parser;
use quickterm_broker::{server, Broker};
use quickterm_core::QuicktermConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Relay between `quickterm` clients and the running daemon.
#[derive(Parser)]
#[command(name = "quickterm-broker")]
#[command(version)]
struct Args {
    /// Config file (default: $QUICKTERM_CONFIG or ~/.config/quickterm/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Listen on this socket instead of <runtime_dir>/broker.sock
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quickterm_broker=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = QuicktermConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        QuicktermConfig::default()
    });
    let socket = args.socket.unwrap_or_else(|| config.ipc.broker_socket());

    let listener = server::bind(&socket).await?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server::serve(listener, Broker::new(), shutdown.clone()));

    wait_for_shutdown_signal().await?;
    info!("shutting down broker");
    shutdown.cancel();
    let _ = server.await;

    if let Err(e) = std::fs::remove_file(&socket) {
        warn!(path = %socket.display(), error = %e, "could not remove broker socket");
    }
    Ok(())
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
