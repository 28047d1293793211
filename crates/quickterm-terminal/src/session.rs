//! Terminal session: one child process and its visibility lifecycle.
//!
//! A `TerminalSession` is a cheap, clonable handle. Clones share state, so
//! the session manager, the stream reader tasks and the exit supervisor all
//! see the same buffers and flags. The underlying child is owned by the
//! supervisor task for as long as it runs.
//!
//! Lifecycle: Created → Running → Finished → (after linger) inactive.
//!
//! The session owns every timer it arms (timeout, post-exit linger). Timers
//! stop when the child exits or when the session is disposed.

use crate::error::{Result, TerminalError};
use crate::types::{OutputStream, SessionEvent, SessionEventKind, SessionId, SessionSnapshot};
use chrono::{DateTime, Utc};
use quickterm_core::CommandConfiguration;
use std::{
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bytes requested per read from each pipe.
const READ_CHUNK_BYTES: usize = 4096;

/// How long to keep draining the pipes after the child exited. Background
/// grandchildren may hold them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Handle to one command execution.
#[derive(Clone)]
pub struct TerminalSession {
    inner: Arc<Inner>,
}

struct Inner {
    id: SessionId,
    configuration: Arc<CommandConfiguration>,
    state: Mutex<SessionState>,
    observers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
    /// Wakes the supervisor to signal the child.
    terminate: Notify,
    /// Cancelled once the child has exited.
    exited: CancellationToken,
    /// Cancelled by `dispose()`; stops every pending timer.
    disposed: CancellationToken,
}

#[derive(Default)]
struct SessionState {
    running: bool,
    finished: bool,
    active: bool,
    dismissed: bool,
    exit_code: Option<i32>,
    success: bool,
    output: String,
    stdout: String,
    stderr: String,
    exit_time: Option<DateTime<Utc>>,
}

impl TerminalSession {
    pub fn new(configuration: CommandConfiguration) -> Self {
        let id = SessionId::new();
        info!(session_id = %id, command = %configuration.command(), "created session");
        Self {
            inner: Arc::new(Inner {
                id,
                configuration: Arc::new(configuration),
                state: Mutex::new(SessionState::default()),
                observers: Mutex::new(Vec::new()),
                terminate: Notify::new(),
                exited: CancellationToken::new(),
                disposed: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn configuration(&self) -> &CommandConfiguration {
        &self.inner.configuration
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Deliver every future lifecycle event of this session to `tx`.
    ///
    /// Several sessions may share one sender; events from one session arrive
    /// in the order they happened.
    pub fn add_observer(&self, tx: mpsc::UnboundedSender<SessionEvent>) {
        lock(&self.inner.observers).push(tx);
    }

    /// Convenience wrapper around [`add_observer`](Self::add_observer).
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add_observer(tx);
        rx
    }

    /// Called with the state lock held so that event order matches the order
    /// of state transitions.
    fn emit(&self, _state: &MutexGuard<'_, SessionState>, kind: SessionEventKind) {
        let event = SessionEvent {
            session_id: self.inner.id.clone(),
            kind,
        };
        lock(&self.inner.observers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Launch the child process.
    ///
    /// No-op when the session is already running or has finished. Returns as
    /// soon as the process is spawned; output, timeout and exit are handled
    /// by background tasks. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Spawn`: the shell could not be launched; the session stays in its
    ///   created state and is never activated.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.running || state.finished {
            debug!(session_id = %self.inner.id, "start ignored, session already started");
            return Ok(());
        }

        let cfg = &self.inner.configuration;
        info!(session_id = %self.inner.id, shell = %cfg.shell(), "starting session");

        let mut child = Command::new(cfg.shell())
            .arg("-c")
            .arg(cfg.script())
            .current_dir(cfg.working_directory())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TerminalError::Spawn {
                shell: cfg.shell().to_string(),
                reason: e.to_string(),
            })?;

        state.running = true;
        self.emit(&state, SessionEventKind::Started);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(stdout, OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(stderr, OutputStream::Stderr));
        }

        if let Some(timeout) = cfg.timeout() {
            self.arm_timeout(timeout);
        }

        // Shown right away unless it should only appear once it has exited.
        if !cfg.wait_for_exit() {
            state.active = true;
            self.emit(&state, SessionEventKind::ActiveChanged { active: true });
        }
        drop(state);

        let session = self.clone();
        tokio::spawn(async move { session.supervise(child, readers).await });
        Ok(())
    }

    /// Ask the child to exit (SIGTERM). Does not block, never escalates to a
    /// forced kill, and does nothing once the session has finished.
    pub fn terminate(&self) {
        let state = self.lock_state();
        if !state.running {
            return;
        }
        info!(session_id = %self.inner.id, "terminating session");
        self.inner.terminate.notify_one();
    }

    /// Hide the session now (the user closed it). Used for `keep` sessions,
    /// which never deactivate on their own.
    pub fn dismiss(&self) {
        let mut state = self.lock_state();
        state.dismissed = true;
        self.deactivate(&mut state);
    }

    /// Cancel all pending timers and terminate a still-running child.
    /// Called by the owner once the session is removed.
    pub fn dispose(&self) {
        debug!(session_id = %self.inner.id, "disposing session");
        self.inner.disposed.cancel();
        self.terminate();
    }

    fn deactivate(&self, state: &mut MutexGuard<'_, SessionState>) {
        if !state.active {
            return;
        }
        state.active = false;
        info!(session_id = %self.inner.id, "session invalidated");
        self.emit(state, SessionEventKind::ActiveChanged { active: false });
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    fn spawn_reader<R>(&self, reader: R, stream: OutputStream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let session = self.clone();
        tokio::spawn(async move { session.read_stream(reader, stream).await })
    }

    /// Drain one pipe chunk by chunk until EOF.
    async fn read_stream<R: AsyncRead + Unpin>(&self, mut reader: R, stream: OutputStream) {
        let mut raw = [0u8; READ_CHUNK_BYTES];
        loop {
            match reader.read(&mut raw).await {
                Ok(0) => {
                    debug!(session_id = %self.inner.id, %stream, "received EOF");
                    break;
                }
                Ok(n) => match std::str::from_utf8(&raw[..n]) {
                    Ok(text) => self.append_output(stream, text),
                    Err(e) => {
                        debug!(session_id = %self.inner.id, %stream, error = %e, "dropped undecodable chunk");
                    }
                },
                Err(e) => {
                    warn!(session_id = %self.inner.id, %stream, error = %e, "output read failed");
                    break;
                }
            }
        }
    }

    fn append_output(&self, stream: OutputStream, text: &str) {
        let mut state = self.lock_state();
        match stream {
            OutputStream::Stdout => state.stdout.push_str(text),
            OutputStream::Stderr => state.stderr.push_str(text),
        }
        state.output.push_str(text);
        self.emit(
            &state,
            SessionEventKind::Output {
                stream,
                text: text.to_string(),
            },
        );
    }

    fn arm_timeout(&self, timeout: Duration) {
        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = session.inner.disposed.cancelled() => {}
                _ = session.inner.exited.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    info!(session_id = %session.inner.id, secs = timeout.as_secs_f64(), "session timed out");
                    session.terminate();
                }
            }
        });
    }

    fn arm_linger(&self, delay: Duration) {
        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = session.inner.disposed.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let mut state = session.lock_state();
                    session.deactivate(&mut state);
                }
            }
        });
    }

    /// Owns the child until it exits, relaying terminate requests to it.
    async fn supervise(self, mut child: Child, readers: Vec<JoinHandle<()>>) {
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = self.inner.terminate.notified() => request_termination(&mut child),
            }
        };

        let drain = async {
            for reader in readers {
                let _ = reader.await;
            }
        };
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, drain).await.is_err() {
            debug!(session_id = %self.inner.id, "output pipes still open after exit");
        }

        let exit_code = match status {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                warn!(session_id = %self.inner.id, error = %e, "waiting for child failed");
                -1
            }
        };
        self.on_termination(exit_code);
    }

    /// Runs exactly once, after the child exited for whatever reason.
    fn on_termination(&self, exit_code: i32) {
        info!(session_id = %self.inner.id, exit_code, "process exited");
        let cfg = &self.inner.configuration;

        let mut state = self.lock_state();
        state.exit_code = Some(exit_code);
        state.success = exit_code == 0;
        state.finished = true;
        state.running = false;
        state.exit_time = Some(Utc::now());
        self.inner.exited.cancel();
        self.emit(
            &state,
            SessionEventKind::Finished {
                exit_code,
                success: exit_code == 0,
            },
        );

        if cfg.wait_for_exit() && !state.active && !state.dismissed {
            state.active = true;
            self.emit(&state, SessionEventKind::ActiveChanged { active: true });
        }
        drop(state);

        if !cfg.keep() {
            self.arm_linger(cfg.delay_after_exit());
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    pub fn has_finished(&self) -> bool {
        self.lock_state().finished
    }

    /// Whether the session should currently be presented. A finished session
    /// stays active during its linger period.
    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    /// `None` until the session has finished.
    pub fn exit_code(&self) -> Option<i32> {
        self.lock_state().exit_code
    }

    /// Valid once `has_finished()` is true.
    pub fn was_successful(&self) -> bool {
        self.lock_state().success
    }

    /// Combined stdout and stderr, in arrival order.
    pub fn output(&self) -> String {
        self.lock_state().output.clone()
    }

    pub fn stdout_output(&self) -> String {
        self.lock_state().stdout.clone()
    }

    pub fn stderr_output(&self) -> String {
        self.lock_state().stderr.clone()
    }

    pub fn exit_time(&self) -> Option<DateTime<Utc>> {
        self.lock_state().exit_time
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock_state();
        SessionSnapshot {
            id: self.inner.id.clone(),
            command: self.inner.configuration.command().to_string(),
            is_running: state.running,
            has_finished: state.finished,
            is_active: state.active,
            exit_code: state.exit_code,
            was_successful: state.success,
            output: state.output.clone(),
            stdout: state.stdout.clone(),
            stderr: state.stderr.clone(),
            exit_time: state.exit_time,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.inner.state)
    }
}

impl PartialEq for TerminalSession {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for TerminalSession {}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.inner.id)
            .field("command", &self.inner.configuration.command())
            .finish()
    }
}

/// A panicked holder cannot leave the plain-data state half-updated in a way
/// that matters here, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn request_termination(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // Safety: pid belongs to our own child, which has not been reaped
            // yet (we still hold the handle and `wait` has not returned).
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

/// Exit code, or `128 + signal` when the child was killed by a signal.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const EVENT_WAIT: Duration = Duration::from_secs(10);

    fn sh(command: &str) -> CommandConfiguration {
        CommandConfiguration::new(std::env::temp_dir(), command)
            .with_shell("sh")
            .with_source_bash_profile(false)
            .with_delay_after_exit(0.1)
    }

    /// Collect events until `stop` matches (inclusive).
    async fn collect_until(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
        stop: impl Fn(&SessionEventKind) -> bool,
    ) -> Vec<SessionEventKind> {
        let mut seen = Vec::new();
        tokio::time::timeout(EVENT_WAIT, async {
            while let Some(event) = rx.recv().await {
                let done = stop(&event.kind);
                seen.push(event.kind);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("timed out waiting for session events");
        seen
    }

    fn is_finished(kind: &SessionEventKind) -> bool {
        matches!(kind, SessionEventKind::Finished { .. })
    }

    fn is_deactivated(kind: &SessionEventKind) -> bool {
        matches!(kind, SessionEventKind::ActiveChanged { active: false })
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let session = TerminalSession::new(sh("echo hello"));
        let mut rx = session.subscribe();
        session.start().unwrap();

        collect_until(&mut rx, is_finished).await;
        assert!(session.has_finished());
        assert!(!session.is_running());
        assert_eq!(session.exit_code(), Some(0));
        assert!(session.was_successful());
        assert_eq!(session.stdout_output(), "hello\n");
        assert_eq!(session.output(), "hello\n");
        assert!(session.exit_time().is_some());
    }

    #[tokio::test]
    async fn non_zero_exit_is_recorded_not_raised() {
        let session = TerminalSession::new(sh("echo oops 1>&2; exit 3"));
        let mut rx = session.subscribe();
        session.start().unwrap();

        let events = collect_until(&mut rx, is_finished).await;
        assert!(events.contains(&SessionEventKind::Finished {
            exit_code: 3,
            success: false
        }));
        assert!(!session.was_successful());
        assert_eq!(session.stderr_output(), "oops\n");
        assert_eq!(session.stdout_output(), "");
        assert_eq!(session.output(), "oops\n");
    }

    #[tokio::test]
    async fn start_twice_launches_once() {
        let session = TerminalSession::new(sh("echo once"));
        let mut rx = session.subscribe();
        session.start().unwrap();
        session.start().unwrap();

        let events = collect_until(&mut rx, is_finished).await;
        let starts = events
            .iter()
            .filter(|k| matches!(k, SessionEventKind::Started))
            .count();
        assert_eq!(starts, 1);
        assert_eq!(session.output(), "once\n");

        // Finished sessions cannot be restarted either.
        session.start().unwrap();
        assert!(!session.is_running());
        assert_eq!(session.output(), "once\n");
    }

    #[tokio::test]
    async fn output_chunks_keep_production_order() {
        let session = TerminalSession::new(sh("printf A; sleep 0.2; printf B"));
        let mut rx = session.subscribe();
        session.start().unwrap();

        let events = collect_until(&mut rx, is_finished).await;
        assert_eq!(session.output(), "AB");

        let chunks: Vec<String> = events
            .into_iter()
            .filter_map(|k| match k {
                SessionEventKind::Output { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(chunks.concat(), "AB");
    }

    #[tokio::test]
    async fn undecodable_chunk_is_dropped() {
        let session = TerminalSession::new(sh(r"printf '\377'; sleep 0.2; printf ok"));
        let mut rx = session.subscribe();
        session.start().unwrap();

        collect_until(&mut rx, is_finished).await;
        assert_eq!(session.output(), "ok");
        assert!(session.was_successful());
    }

    #[tokio::test]
    async fn timeout_terminates_the_child() {
        let session = TerminalSession::new(sh("sleep 5").with_timeout(0.3));
        let mut rx = session.subscribe();
        let started = Instant::now();
        session.start().unwrap();

        collect_until(&mut rx, is_finished).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(250), "terminated too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "timeout not enforced: {elapsed:?}");
        assert!(session.has_finished());
        assert!(!session.was_successful());
    }

    #[tokio::test]
    async fn terminate_after_finish_is_a_no_op() {
        let session = TerminalSession::new(sh("true"));
        let mut rx = session.subscribe();
        session.start().unwrap();
        collect_until(&mut rx, is_finished).await;

        session.terminate();
        assert_eq!(session.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn spawn_failure_leaves_session_unstarted() {
        let session = TerminalSession::new(sh("true").with_shell("/definitely/not/a/shell"));
        let mut rx = session.subscribe();

        let err = session.start().unwrap_err();
        assert!(matches!(err, TerminalError::Spawn { .. }));
        assert!(!session.is_running());
        assert!(!session.is_active());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_working_directory_is_a_spawn_error() {
        let cfg = CommandConfiguration::new("/definitely/not/a/dir", "true")
            .with_shell("sh")
            .with_source_bash_profile(false);
        let session = TerminalSession::new(cfg);
        assert!(session.start().is_err());
        assert!(!session.has_finished());
    }

    #[tokio::test]
    async fn active_immediately_then_inactive_after_linger() {
        let session = TerminalSession::new(sh("true"));
        let mut rx = session.subscribe();
        session.start().unwrap();
        assert!(session.is_active());

        let events = collect_until(&mut rx, is_deactivated).await;
        assert_eq!(events[0], SessionEventKind::Started);
        assert_eq!(events[1], SessionEventKind::ActiveChanged { active: true });
        assert!(events.iter().any(is_finished));
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn wait_for_exit_activates_exactly_once_on_finish() {
        let session = TerminalSession::new(sh("sleep 0.3; echo done").with_wait_for_exit(true));
        let mut rx = session.subscribe();
        session.start().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(session.is_running());
        assert!(!session.is_active());

        let events = collect_until(&mut rx, is_deactivated).await;
        let finished_at = events.iter().position(is_finished).unwrap();
        let activations: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, k)| matches!(k, SessionEventKind::ActiveChanged { active: true }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(activations, vec![finished_at + 1]);
        assert_eq!(session.output(), "done\n");
    }

    #[tokio::test]
    async fn keep_stays_active_until_dismissed() {
        let session = TerminalSession::new(sh("true").with_keep(true));
        let mut rx = session.subscribe();
        session.start().unwrap();
        collect_until(&mut rx, is_finished).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(session.is_active());

        session.dismiss();
        assert!(!session.is_active());
        let events = collect_until(&mut rx, is_deactivated).await;
        assert_eq!(events, vec![SessionEventKind::ActiveChanged { active: false }]);
    }

    #[tokio::test]
    async fn dispose_cancels_linger_timer() {
        let session = TerminalSession::new(sh("true").with_delay_after_exit(0.2));
        let mut rx = session.subscribe();
        session.start().unwrap();
        collect_until(&mut rx, is_finished).await;

        session.dispose();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(session.is_active());
        while let Ok(event) = rx.try_recv() {
            assert!(!is_deactivated(&event.kind));
        }
    }

    #[tokio::test]
    async fn equality_is_by_identity() {
        let a = TerminalSession::new(sh("true"));
        let b = TerminalSession::new(sh("true"));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn snapshot_reflects_finished_state() {
        let session = TerminalSession::new(sh("echo out; echo err 1>&2"));
        let mut rx = session.subscribe();
        session.start().unwrap();
        collect_until(&mut rx, is_finished).await;

        let snap = session.snapshot();
        assert_eq!(&snap.id, session.id());
        assert_eq!(snap.command, "echo out; echo err 1>&2");
        assert!(snap.has_finished && !snap.is_running);
        assert_eq!(snap.exit_code, Some(0));
        assert_eq!(snap.stdout, "out\n");
        assert_eq!(snap.stderr, "err\n");
        assert_eq!(snap.output.len(), 8);
        assert!(snap.exit_time.is_some());
    }

    #[test]
    fn event_serializes_with_kind_tag() {
        let event = SessionEvent {
            session_id: SessionId("s-1".to_string()),
            kind: SessionEventKind::ActiveChanged { active: true },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"active_changed""#));
        assert!(json.contains(r#""active":true"#));
        assert!(json.contains(r#""session_id":"s-1""#));
    }
}
