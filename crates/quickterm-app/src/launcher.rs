//! Finding and launching the long-lived processes: broker and daemon.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use quickterm_broker::BrokerClient;
use quickterm_core::config::{
    IpcConfig, BROKER_SPAWN_ATTEMPTS, BROKER_SPAWN_BACKOFF_MS, DEFAULT_BROKER_PROGRAM,
};
use quickterm_protocol::codec;
use quickterm_protocol::messages::{ExecutorHello, HelloParams};
use quickterm_protocol::methods::EXECUTOR_HELLO;
use quickterm_protocol::ReqFrame;
use tokio::net::UnixStream;
use tracing::{debug, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A daemon runs iff its executor socket accepts a connection and answers
/// `executor.hello` like an executor.
pub async fn daemon_running(ipc: &IpcConfig) -> bool {
    probe_executor(&ipc.executor_socket()).await
}

async fn probe_executor(socket: &Path) -> bool {
    let probe = async {
        let stream = UnixStream::connect(socket).await.ok()?;
        let mut transport = codec::framed(stream);
        let req = ReqFrame::new(EXECUTOR_HELLO, HelloParams::client());
        let res = codec::request(&mut transport, &req).await.ok()?;
        res.payload_as::<ExecutorHello>()
    };
    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Some(hello)) => hello.is_compatible(),
        _ => false,
    }
}

/// Connect to a live broker, launching one first if nobody answers.
pub async fn ensure_broker(ipc: &IpcConfig) -> anyhow::Result<BrokerClient> {
    let socket = ipc.broker_socket();
    if let Some(client) = ping_broker(&socket).await {
        return Ok(client);
    }

    let program = broker_program(ipc);
    info!(program = %program.display(), "launching broker");
    spawn_detached(&program, [OsStr::new("--socket"), socket.as_os_str()])
        .with_context(|| format!("failed to launch {}", program.display()))?;

    for attempt in 1..=BROKER_SPAWN_ATTEMPTS {
        tokio::time::sleep(Duration::from_millis(BROKER_SPAWN_BACKOFF_MS)).await;
        if let Some(client) = ping_broker(&socket).await {
            return Ok(client);
        }
        debug!(attempt, "broker not up yet");
    }
    bail!("broker did not come up at {}", socket.display())
}

async fn ping_broker(socket: &Path) -> Option<BrokerClient> {
    let mut client = BrokerClient::connect(socket).await.ok()?;
    client.ping().await.ok()?;
    Some(client)
}

/// Configured program, else `quickterm-broker` next to this executable,
/// else whatever `PATH` resolves.
fn broker_program(ipc: &IpcConfig) -> PathBuf {
    if let Some(program) = &ipc.broker_program {
        return PathBuf::from(program);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_BROKER_PROGRAM)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BROKER_PROGRAM))
}

/// Re-run this executable as a background daemon.
pub fn spawn_daemon() -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    spawn_detached(&exe, ["--daemon"])
        .with_context(|| format!("failed to launch {} --daemon", exe.display()))
}

/// Start `program` in its own process group with no stdio attached, without
/// waiting for it.
fn spawn_detached<I, S>(program: &Path, args: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    cmd.process_group(0);
    let child = cmd.spawn()?;
    debug!(pid = ?child.id(), program = %program.display(), "spawned detached process");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipc_in(dir: &Path) -> IpcConfig {
        IpcConfig {
            runtime_dir: Some(dir.display().to_string()),
            broker_program: None,
        }
    }

    #[tokio::test]
    async fn no_socket_means_no_daemon() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!daemon_running(&ipc_in(dir.path())).await);
    }

    #[tokio::test]
    async fn silent_listener_is_not_a_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let ipc = ipc_in(dir.path());
        let listener = tokio::net::UnixListener::bind(ipc.executor_socket()).unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        assert!(!daemon_running(&ipc).await);
    }

    #[test]
    fn configured_broker_program_wins() {
        let ipc = IpcConfig {
            runtime_dir: None,
            broker_program: Some("/opt/qt/broker".into()),
        };
        assert_eq!(broker_program(&ipc), PathBuf::from("/opt/qt/broker"));
    }
}
