//! Protocol session management
//!
//! A session is created when a streaming connection is established and owns
//! three things: an event sink towards that connection, the set of tool
//! calls still pending for it, and a cancellation token. The table routes
//! results to sinks and holds no tool logic of its own.
//!
//! Lifecycle: `Open` while the `endpoint` event is queued, `Active` while the
//! connection is live, `Closing` while pending calls are abandoned, `Closed`
//! once the id has been released. Closing is triggered by disconnect, idle
//! timeout, an explicit close, or server shutdown. Cancelling a session only
//! cancels tasks spawned for that session.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::auth::pkce::random_urlsafe;
use crate::config::ServerConfig;
use crate::error::{Result, VitalgateError};
use crate::mcp::types::{CallOutcome, EndpointEvent, ResultEvent, SUBMIT_PATH};

/// Random bytes behind each session id.
const SESSION_ID_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How a session's client is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Long-lived server-sent event stream
    Streaming,
}

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    /// Created; the endpoint event is being queued
    Open = 0,
    /// Connected and accepting submissions
    Active = 1,
    /// Abandoning pending calls
    Closing = 2,
    /// Released
    Closed = 3,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionPhase::Open,
            1 => SessionPhase::Active,
            2 => SessionPhase::Closing,
            _ => SessionPhase::Closed,
        }
    }
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away
    Disconnected,
    /// No activity within the idle timeout
    IdleTimeout,
    /// `DELETE /sse/{id}`
    Explicit,
    /// Server shutdown
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CloseReason::Disconnected => "disconnected",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Explicit => "explicit",
            CloseReason::Shutdown => "shutdown",
        })
    }
}

/// Something pushed to a streaming client.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// First event: session id and submit URL
    Endpoint(EndpointEvent),
    /// A finished tool call
    Result(ResultEvent),
    /// Keep-alive
    Heartbeat,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Session limits and timers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between heartbeats (also the idle-check period)
    pub heartbeat_interval: Duration,
    /// Close sessions idle for longer than this
    pub idle_timeout: Duration,
    /// Maximum concurrently open sessions
    pub max_sessions: usize,
    /// Per-session event buffer
    pub channel_capacity: usize,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            idle_timeout: Duration::from_secs(config.session_idle_timeout_seconds),
            max_sessions: config.max_sessions,
            channel_capacity: config.session_channel_capacity,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingToolCall {
    tool_name: String,
    submitted_at: Instant,
}

#[derive(Debug)]
struct Session {
    id: String,
    kind: TransportKind,
    sink: mpsc::Sender<SessionEvent>,
    phase: AtomicU8,
    created: Instant,
    last_activity_ms: AtomicU64,
    pending: Mutex<HashMap<String, PendingToolCall>>,
    cancel: CancellationToken,
}

impl Session {
    fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn touch(&self) {
        let now = self.created.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingToolCall>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

struct ManagerInner {
    sessions: DashMap<String, Arc<Session>>,
    /// Serializes the capacity check with the insert in `open`.
    admission: Mutex<()>,
    config: SessionConfig,
    shutdown: CancellationToken,
}

/// Table of live streaming sessions.
///
/// Cloning is cheap; all clones share one table.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Creates an empty table.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: DashMap::new(),
                admission: Mutex::new(()),
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Opens a streaming session and returns its event stream.
    ///
    /// The first item on the stream is always [`SessionEvent::Endpoint`].
    /// Dropping the stream closes the session as disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::CapacityExceeded`] when `max_sessions`
    /// sessions are already open.
    pub fn open(&self) -> Result<SessionStream> {
        let admission = self.inner.admission.lock().unwrap_or_else(|e| e.into_inner());
        if self.inner.sessions.len() >= self.inner.config.max_sessions {
            tracing::warn!(
                max = self.inner.config.max_sessions,
                "Session limit reached, rejecting new session"
            );
            return Err(VitalgateError::CapacityExceeded(format!(
                "at most {} streaming sessions may be open",
                self.inner.config.max_sessions
            ))
            .into());
        }

        let id = random_urlsafe(SESSION_ID_BYTES);
        let (sink, rx) = mpsc::channel(self.inner.config.channel_capacity.max(1));
        let session = Arc::new(Session {
            id: id.clone(),
            kind: TransportKind::Streaming,
            sink,
            phase: AtomicU8::new(SessionPhase::Open as u8),
            created: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            cancel: self.inner.shutdown.child_token(),
        });

        let endpoint = SessionEvent::Endpoint(EndpointEvent {
            session_id: id.clone(),
            submit_url: SUBMIT_PATH.to_string(),
        });
        session.sink.try_send(endpoint).map_err(|_| {
            VitalgateError::CapacityExceeded("session channel has no capacity".to_string())
        })?;
        session.set_phase(SessionPhase::Active);

        self.inner.sessions.insert(id.clone(), Arc::clone(&session));
        drop(admission);
        self.spawn_heartbeat(Arc::clone(&session));

        tracing::info!(session_id = %id, kind = ?session.kind, total = self.inner.sessions.len(), "Session opened");
        Ok(SessionStream {
            id,
            events: ReceiverStream::new(rx),
            manager: self.clone(),
        })
    }

    /// Runs `work` for `invocation_id` on session `session_id` and pushes its
    /// outcome to that session's stream.
    ///
    /// The outcome is discarded if the session closes first.
    ///
    /// # Errors
    ///
    /// - [`VitalgateError::UnknownSession`] if the session is absent or not active
    /// - [`VitalgateError::MalformedRequest`] if `invocation_id` is already pending
    pub fn dispatch<F>(&self, session_id: &str, invocation_id: &str, tool_name: &str, work: F) -> Result<()>
    where
        F: Future<Output = CallOutcome> + Send + 'static,
    {
        let session = self.live(session_id)?;
        {
            let mut pending = session.pending();
            if pending.contains_key(invocation_id) {
                return Err(VitalgateError::MalformedRequest(format!(
                    "invocation '{}' is already pending on this session",
                    invocation_id
                ))
                .into());
            }
            pending.insert(
                invocation_id.to_string(),
                PendingToolCall {
                    tool_name: tool_name.to_string(),
                    submitted_at: Instant::now(),
                },
            );
        }
        session.touch();

        let invocation_id = invocation_id.to_string();
        let cancel = session.cancel.clone();
        tracing::debug!(session_id = %session.id, invocation_id = %invocation_id, tool = tool_name, "Dispatched tool call");

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id = %session.id, invocation_id = %invocation_id, "Pending call abandoned");
                }
                _ = async {
                    let outcome = work.await;
                    deliver(&session, invocation_id.clone(), outcome).await;
                } => {}
            }
        });
        Ok(())
    }

    /// Closes session `id`. Returns `false` if it was not open.
    pub fn close(&self, id: &str, reason: CloseReason) -> bool {
        let Some((_, session)) = self.inner.sessions.remove(id) else {
            return false;
        };

        session.set_phase(SessionPhase::Closing);
        session.cancel.cancel();
        let abandoned: Vec<(String, PendingToolCall)> = session.pending().drain().collect();
        for (invocation_id, call) in &abandoned {
            tracing::debug!(
                session_id = %id,
                invocation_id = %invocation_id,
                tool = %call.tool_name,
                waited_ms = call.submitted_at.elapsed().as_millis() as u64,
                "Abandoned pending call"
            );
        }
        session.set_phase(SessionPhase::Closed);

        tracing::info!(
            session_id = %id,
            reason = %reason,
            abandoned = abandoned.len(),
            remaining = self.inner.sessions.len(),
            "Session closed"
        );
        true
    }

    /// Closes session `id` on client request.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::UnknownSession`] if it was not open.
    pub fn close_explicit(&self, id: &str) -> Result<()> {
        if self.close(id, CloseReason::Explicit) {
            Ok(())
        } else {
            Err(VitalgateError::UnknownSession(id.to_string()).into())
        }
    }

    /// Current phase of `id`, or `None` once released.
    pub fn phase(&self, id: &str) -> Option<SessionPhase> {
        self.inner.sessions.get(id).map(|s| s.phase())
    }

    /// Calls still pending on `id`.
    pub fn pending_calls(&self, id: &str) -> Option<usize> {
        self.inner.sessions.get(id).map(|s| s.pending().len())
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Closes every session and stops all session tasks.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.close(&id, CloseReason::Shutdown);
        }
        self.inner.shutdown.cancel();
    }

    fn live(&self, id: &str) -> Result<Arc<Session>> {
        match self.inner.sessions.get(id) {
            Some(entry) if entry.phase() == SessionPhase::Active => Ok(Arc::clone(entry.value())),
            _ => Err(VitalgateError::UnknownSession(id.to_string()).into()),
        }
    }

    fn spawn_heartbeat(&self, session: Arc<Session>) {
        let manager = self.clone();
        let period = self.inner.config.heartbeat_interval;
        let idle_timeout = self.inner.config.idle_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if session.idle_for() >= idle_timeout {
                            manager.close(&session.id, CloseReason::IdleTimeout);
                            break;
                        }
                        match session.sink.try_send(SessionEvent::Heartbeat) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                tracing::debug!(session_id = %session.id, "Heartbeat skipped, channel full");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                manager.close(&session.id, CloseReason::Disconnected);
                                break;
                            }
                        }
                    }
                }
            }
        });
    }
}

async fn deliver(session: &Session, invocation_id: String, outcome: CallOutcome) {
    if session.pending().remove(&invocation_id).is_none() {
        tracing::debug!(session_id = %session.id, invocation_id = %invocation_id, "Discarding result for abandoned call");
        return;
    }
    if session.phase() != SessionPhase::Active {
        tracing::debug!(session_id = %session.id, invocation_id = %invocation_id, "Discarding result for closing session");
        return;
    }

    let is_error = matches!(outcome, CallOutcome::Error(_));
    let event = SessionEvent::Result(ResultEvent {
        invocation_id: invocation_id.clone(),
        outcome,
    });
    if session.sink.send(event).await.is_ok() {
        session.touch();
        tracing::debug!(session_id = %session.id, invocation_id = %invocation_id, is_error, "Delivered result");
    } else {
        tracing::debug!(session_id = %session.id, invocation_id = %invocation_id, "Client gone before result delivery");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.inner.sessions.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SessionStream
// ---------------------------------------------------------------------------

/// Events for one streaming session.
///
/// Owned by the HTTP response body; dropping it closes the session.
pub struct SessionStream {
    id: String,
    events: ReceiverStream<SessionEvent>,
    manager: SessionManager,
}

impl SessionStream {
    /// The session id.
    pub fn session_id(&self) -> &str {
        &self.id
    }
}

impl Stream for SessionStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.manager.close(&self.id, CloseReason::Disconnected);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
