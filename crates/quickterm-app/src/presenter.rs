//! Console presenter: renders manager events as log lines.
//!
//! Stands in for the notification window. ANSI escapes are stripped since
//! log output is plain text. The console has no close action, so `keep`
//! sessions are dismissed as soon as they finish.

use quickterm_sessions::{ManagerEvent, TerminalSessionManager};
use quickterm_terminal::SessionId;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

pub async fn run(manager: TerminalSessionManager) {
    let mut events = manager.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => {
                present(&event);
                if let ManagerEvent::Finished { session_id, .. } = &event {
                    dismiss_kept(&manager, session_id);
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "presenter fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn present(event: &ManagerEvent) {
    match event {
        ManagerEvent::Presented { session_id, command } => {
            info!(%session_id, %command, "presenting session");
        }
        ManagerEvent::Output {
            session_id,
            stream,
            text,
        } => {
            for line in plain_text(text).lines() {
                info!(%session_id, %stream, "{line}");
            }
        }
        ManagerEvent::Finished {
            session_id,
            exit_code,
            success,
        } => {
            info!(%session_id, exit_code, success, "session finished");
        }
        ManagerEvent::Removed { session_id } => {
            info!(%session_id, "session dismissed");
        }
    }
}

fn dismiss_kept(manager: &TerminalSessionManager, session_id: &SessionId) {
    let Some(session) = manager.session(session_id) else {
        return;
    };
    if session.configuration().keep() {
        debug!(%session_id, "dismissing kept session");
        session.dismiss();
    }
}

/// `text` without ANSI escape sequences.
pub fn plain_text(text: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(text)).into_owned()
}
