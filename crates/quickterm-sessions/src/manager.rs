use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use chrono::Utc;
use quickterm_terminal::{OutputStream, SessionEvent, SessionEventKind, SessionId, TerminalSession};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::queue::Queue;

const BROADCAST_CAPACITY: usize = 256;

/// What presenters are told about the sessions they should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ManagerEvent {
    /// The session entered the presented list. Output and exit events that
    /// arrived before it are replayed right after this one.
    Presented { session_id: SessionId, command: String },
    /// Output arrived for a presented session.
    Output {
        session_id: SessionId,
        stream: OutputStream,
        text: String,
    },
    Finished {
        session_id: SessionId,
        exit_code: i32,
        success: bool,
    },
    /// The session is gone for good and has been disposed.
    Removed { session_id: SessionId },
}

/// Owns every scheduled session for its visible lifetime.
///
/// Cheap to clone. All session lifecycle events funnel into one event-loop
/// task, so presented-list and removal-queue updates happen one at a time and
/// the queue order is the order in which sessions became inactive.
#[derive(Clone)]
pub struct TerminalSessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    state: Mutex<ManagerState>,
    /// Handed to every scheduled session as its observer.
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    broadcast: broadcast::Sender<ManagerEvent>,
}

#[derive(Default)]
struct ManagerState {
    /// Every session scheduled and not yet removed.
    sessions: HashMap<SessionId, TerminalSession>,
    presented: Vec<TerminalSession>,
    removal_paused: bool,
    removal_queue: Queue<TerminalSession>,
    /// Output and exit events of sessions not presented yet.
    held: HashMap<SessionId, Vec<ManagerEvent>>,
}

impl ManagerState {
    fn is_visible(&self, session: &TerminalSession) -> bool {
        self.presented.contains(session)
            || self.removal_queue.iter().any(|queued| queued == session)
    }
}

impl TerminalSessionManager {
    /// Create the manager and spawn its event loop on the current runtime.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        let inner = Arc::new(ManagerInner {
            state: Mutex::new(ManagerState::default()),
            events_tx,
            broadcast,
        });
        tokio::spawn(event_loop(Arc::downgrade(&inner), events_rx));
        Self { inner }
    }

    /// Presenter-facing event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.broadcast.subscribe()
    }

    /// Start `session` once its configured start time is reached.
    ///
    /// The manager observes the session from here on. A session that fails
    /// to spawn is logged and forgotten; it never gets presented.
    pub fn schedule(&self, session: TerminalSession) {
        session.add_observer(self.inner.events_tx.clone());
        self.lock_state()
            .sessions
            .insert(session.id().clone(), session.clone());

        let delay = session.configuration().start_delay(Utc::now());
        info!(
            session_id = %session.id(),
            delay_ms = delay.as_millis() as u64,
            "scheduled session"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !manager.is_tracked(session.id()) {
                debug!(session_id = %session.id(), "session removed before its start time");
                return;
            }
            if let Err(e) = session.start() {
                error!(session_id = %session.id(), error = %e, "failed to start session");
                manager.lock_state().sessions.remove(session.id());
            }
        });
    }

    /// Defer removals (e.g. while the pointer hovers the notification).
    pub fn pause_removal(&self) {
        debug!("removal paused");
        self.lock_state().removal_paused = true;
    }

    /// Allow removals again and replay every deferred one, oldest first.
    pub fn resume_removal(&self) {
        let mut state = self.lock_state();
        state.removal_paused = false;
        let mut drained = 0usize;
        while let Some(session) = state.removal_queue.dequeue() {
            self.remove_locked(&mut state, &session);
            drained += 1;
        }
        debug!(drained, "removal resumed");
    }

    pub fn is_removal_paused(&self) -> bool {
        self.lock_state().removal_paused
    }

    /// Drop `session` from every list and dispose it. No-op if unknown.
    pub fn remove(&self, session: &TerminalSession) {
        let mut state = self.lock_state();
        state.removal_queue.retain(|queued| queued != session);
        self.remove_locked(&mut state, session);
    }

    /// Look up a tracked session, e.g. to dismiss it from the UI.
    pub fn session(&self, id: &SessionId) -> Option<TerminalSession> {
        self.lock_state().sessions.get(id).cloned()
    }

    /// Sessions currently presented, in presentation order.
    pub fn presented_sessions(&self) -> Vec<TerminalSession> {
        self.lock_state().presented.clone()
    }

    /// Inactive sessions waiting for removal to resume, oldest first.
    pub fn queued_sessions(&self) -> Vec<TerminalSession> {
        self.lock_state().removal_queue.iter().cloned().collect()
    }

    /// Everything the user can still see: presented, then deferred.
    pub fn visible_sessions(&self) -> Vec<TerminalSession> {
        let state = self.lock_state();
        state
            .presented
            .iter()
            .chain(state.removal_queue.iter())
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    fn handle_event(&self, event: SessionEvent) {
        let Some(session) = self.session(&event.session_id) else {
            debug!(session_id = %event.session_id, "event for untracked session");
            return;
        };
        match event.kind {
            SessionEventKind::Started => {
                debug!(session_id = %event.session_id, "session started");
            }
            SessionEventKind::Output { stream, text } => {
                self.publish_or_hold(
                    &session,
                    ManagerEvent::Output {
                        session_id: event.session_id,
                        stream,
                        text,
                    },
                );
            }
            SessionEventKind::Finished { exit_code, success } => {
                self.publish_or_hold(
                    &session,
                    ManagerEvent::Finished {
                        session_id: event.session_id,
                        exit_code,
                        success,
                    },
                );
            }
            SessionEventKind::ActiveChanged { active } => {
                self.handle_active_changed(&session, active);
            }
        }
    }

    /// Present newly active sessions; remove or defer inactive ones.
    pub(crate) fn handle_active_changed(&self, session: &TerminalSession, active: bool) {
        let mut state = self.lock_state();
        if active {
            if state.is_visible(session) {
                return;
            }
            state
                .sessions
                .entry(session.id().clone())
                .or_insert_with(|| session.clone());
            state.presented.push(session.clone());
            info!(session_id = %session.id(), "session presented");
            self.publish(ManagerEvent::Presented {
                session_id: session.id().clone(),
                command: session.configuration().command().to_string(),
            });
            for held in state.held.remove(session.id()).unwrap_or_default() {
                self.publish(held);
            }
            return;
        }

        if state.removal_paused {
            if let Some(pos) = state.presented.iter().position(|s| s == session) {
                let deferred = state.presented.remove(pos);
                debug!(session_id = %session.id(), "removal deferred");
                state.removal_queue.enqueue(deferred);
            }
        } else {
            self.remove_locked(&mut state, session);
        }
    }

    /// Publish `event` if `session` is on screen, otherwise keep it for
    /// replay once the session is presented.
    fn publish_or_hold(&self, session: &TerminalSession, event: ManagerEvent) {
        let mut state = self.lock_state();
        if state.is_visible(session) {
            self.publish(event);
        } else {
            state
                .held
                .entry(session.id().clone())
                .or_default()
                .push(event);
        }
    }

    fn remove_locked(&self, state: &mut ManagerState, session: &TerminalSession) {
        state.held.remove(session.id());
        let was_presented = match state.presented.iter().position(|s| s == session) {
            Some(pos) => {
                state.presented.remove(pos);
                true
            }
            None => false,
        };
        let was_tracked = state.sessions.remove(session.id()).is_some();
        if !was_presented && !was_tracked {
            return;
        }
        session.dispose();
        info!(session_id = %session.id(), "session removed");
        self.publish(ManagerEvent::Removed {
            session_id: session.id().clone(),
        });
    }

    fn publish(&self, event: ManagerEvent) {
        // No presenter subscribed is fine.
        let _ = self.inner.broadcast.send(event);
    }

    fn is_tracked(&self, id: &SessionId) -> bool {
        self.lock_state().sessions.contains_key(id)
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TerminalSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes every session event; exits once the manager is dropped.
async fn event_loop(inner: Weak<ManagerInner>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        TerminalSessionManager { inner }.handle_event(event);
    }
    debug!("session manager event loop stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
