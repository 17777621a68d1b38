//! # Session Registry
//!
//! A [`Session`] is the in-flight state of one call, addressed by the caller's correlation id:
//! the transport connection, the resolved method, the outbound handoff queue and the stop
//! signal shared with the session's workers.
//!
//! The [`SessionRegistry`] owns every session. Workers only hold an `Arc` for their own
//! lifetime and never touch a session once it reports [`Phase::Closed`]: closing takes the
//! connection and the queue out of the session under its lock, so a late worker finds
//! nothing left to operate on.
use crate::descriptor::StreamingMode;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tonic::transport::{Channel, Endpoint};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("Failed to connect to '{host}': {source}")]
    ConnectionFailed {
        host: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("Timed out after {timeout:?} connecting to '{host}'")]
    Timeout { host: String, timeout: Duration },
}

/// Operations aimed at a session that cannot take them. Never surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No open session with id '{0}'")]
    Unknown(String),
    #[error("Session '{0}' is already closed")]
    Closed(String),
    #[error("Session '{0}' was asked to stop")]
    Stopped(String),
    #[error("Session '{0}' has not finished opening its call")]
    NotReady(String),
    #[error("Session '{id}' is {mode} and does not accept pushed messages")]
    NotStreaming { id: String, mode: StreamingMode },
}

/// Lifecycle of a session. Moves forward only; `Closed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Dialing,
    Resolving,
    Active,
    Draining,
    Closed,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    mode: StreamingMode,
    phase: Mutex<Phase>,
    channel: Mutex<Option<Channel>>,
    outbound: Mutex<Option<mpsc::Sender<DynamicMessage>>>,
    method: OnceLock<MethodDescriptor>,
    stop: CancellationToken,
}

impl Session {
    pub fn new(id: impl Into<String>, mode: StreamingMode) -> Self {
        Self {
            id: id.into(),
            mode,
            phase: Mutex::new(Phase::Dialing),
            channel: Mutex::new(None),
            outbound: Mutex::new(None),
            method: OnceLock::new(),
            stop: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> StreamingMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Moves to `next` if it lies ahead of the current phase. Returns whether the phase changed.
    ///
    /// Closing goes through [`Session::release`], never through here.
    pub fn advance(&self, next: Phase) -> bool {
        if next == Phase::Closed {
            return false;
        }

        let mut phase = lock(&self.phase);
        if *phase < next {
            tracing::debug!(session = %self.id, from = ?*phase, to = ?next, "session phase");
            *phase = next;
            true
        } else {
            false
        }
    }

    /// Stores the dialed connection and moves on to `Resolving`, unless the session was closed
    /// while dialing.
    pub(crate) fn connected(&self, channel: Channel) {
        let phase = lock(&self.phase);
        if *phase == Phase::Closed {
            return;
        }
        drop(phase);

        *lock(&self.channel) = Some(channel);
        self.advance(Phase::Resolving);
    }

    /// Records the resolved method and the handoff queue and moves on to `Active`.
    ///
    /// Returns `false` when the session was closed in the meantime; the queue is dropped then.
    pub(crate) fn activate(
        &self,
        method: MethodDescriptor,
        outbound: Option<mpsc::Sender<DynamicMessage>>,
    ) -> bool {
        let phase = lock(&self.phase);
        if *phase == Phase::Closed {
            return false;
        }
        drop(phase);

        let _ = self.method.set(method);
        *lock(&self.outbound) = outbound;
        self.advance(Phase::Active)
    }

    /// The connection, while the session is open.
    pub fn channel(&self) -> Option<Channel> {
        lock(&self.channel).clone()
    }

    /// The resolved method, once the session is active.
    pub fn method(&self) -> Option<&MethodDescriptor> {
        self.method.get()
    }

    /// The handoff queue, while the session accepts pushes.
    ///
    /// `None` once the session was stopped or closed, or for modes without a queue.
    pub fn outbound(&self) -> Option<mpsc::Sender<DynamicMessage>> {
        if self.stop.is_cancelled() {
            return None;
        }
        lock(&self.outbound).clone()
    }

    /// Raises the stop signal. Returns `false` if it was already raised.
    pub fn request_stop(&self) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        tracing::debug!(session = %self.id, "stop requested");
        self.stop.cancel();
        true
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Completes once the stop signal is raised.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }

    /// Closes the session: drops the connection and the queue and signals the workers.
    ///
    /// Only the first call has any effect and returns `true`.
    pub(crate) fn release(&self) -> bool {
        let mut phase = lock(&self.phase);
        if *phase == Phase::Closed {
            return false;
        }
        *phase = Phase::Closed;
        drop(phase);

        lock(&self.outbound).take();
        lock(&self.channel).take();
        self.stop.cancel();

        tracing::debug!(session = %self.id, "session closed");
        true
    }
}

/// Result of [`SessionRegistry::open`].
#[derive(Debug, Clone)]
pub enum Opened {
    /// A new session was registered and dialed.
    Created(Arc<Session>),
    /// A session with this id is already registered, possibly still dialing; nothing was dialed.
    Existing(Arc<Session>),
}

/// Every open session, by id. Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the open session with this id, or registers a new one and dials `host` for it.
    ///
    /// The session is registered in [`Phase::Dialing`] before the dial starts, so a concurrent
    /// `open` with the same id gets [`Opened::Existing`]. Dialing happens outside the lock.
    /// A failed dial removes the session again.
    pub async fn open(
        &self,
        id: &str,
        mode: StreamingMode,
        host: &str,
        connect_timeout: Duration,
    ) -> Result<Opened, ConnectionError> {
        let session = match self.insert(Session::new(id, mode)) {
            Opened::Created(session) => session,
            existing => return Ok(existing),
        };

        match connect(host, connect_timeout).await {
            Ok(channel) => {
                session.connected(channel);
                Ok(Opened::Created(session))
            }
            Err(error) => {
                self.discard(&session);
                Err(error)
            }
        }
    }

    pub(crate) fn insert(&self, session: Session) -> Opened {
        let mut sessions = lock(&self.sessions);
        if let Some(existing) = sessions.get(session.id()) {
            return Opened::Existing(existing.clone());
        }

        let session = Arc::new(session);
        sessions.insert(session.id().to_string(), session.clone());
        Opened::Created(session)
    }

    /// Unregisters `session` without reporting it closed. Another session under the same id
    /// is left alone.
    fn discard(&self, session: &Arc<Session>) {
        let mut sessions = lock(&self.sessions);
        if sessions
            .get(session.id())
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(session.id());
        }
        drop(sessions);
        session.release();
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        lock(&self.sessions).get(id).cloned()
    }

    /// Removes and releases the session. Unknown or already closed ids are a no-op.
    ///
    /// Returns `true` only for the call that actually closed the session.
    pub fn close(&self, id: &str) -> bool {
        let removed = lock(&self.sessions).remove(id);
        removed.is_some_and(|session| session.release())
    }

    /// The sessions open right now.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        lock(&self.sessions).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dials `host` over plaintext HTTP/2, giving up after `timeout`.
///
/// Hosts without a scheme (`127.0.0.1:50051`) are dialed as `http://host`.
pub async fn connect(host: &str, timeout: Duration) -> Result<Channel, ConnectionError> {
    let uri = endpoint_uri(host)?;
    let endpoint = Endpoint::from_shared(uri).map_err(|e| ConnectionError::InvalidHost {
        host: host.to_string(),
        reason: e.to_string(),
    })?;

    match tokio::time::timeout(timeout, endpoint.connect()).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(source)) => Err(ConnectionError::ConnectionFailed {
            host: host.to_string(),
            source,
        }),
        Err(_) => Err(ConnectionError::Timeout {
            host: host.to_string(),
            timeout,
        }),
    }
}

fn endpoint_uri(host: &str) -> Result<String, ConnectionError> {
    let host = host.trim();
    let invalid = |reason: &str| ConnectionError::InvalidHost {
        host: host.to_string(),
        reason: reason.to_string(),
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }

    match host.split_once("://") {
        None => Ok(format!("http://{host}")),
        Some(("http", _)) => Ok(host.to_string()),
        Some(("https", _)) => Err(invalid("TLS is not supported, use a plaintext http:// host")),
        Some((scheme, _)) => Err(invalid(&format!("unsupported scheme '{scheme}'"))),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
