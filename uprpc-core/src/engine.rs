//! # Invocation Engine
//!
//! The [`Engine`] turns [`RequestEnvelope`]s into live gRPC calls and reports everything that
//! happens on them to an [`EventSink`] as `data` and `end` events.
//!
//! ## Session lifecycle
//!
//! Every call is a session in the [`SessionRegistry`], addressed by the envelope id:
//!
//! `Dialing -> Resolving -> Active -> (Draining) -> Closed`
//!
//! * **Unary** calls run to completion inside [`Engine::send`]; no task is spawned.
//! * **Client streaming** calls get a handoff queue fed by [`Engine::push`] and a writer that
//!   forwards it onto the call. [`Engine::stop`] closes the send side and the single reply
//!   is reported.
//! * **Server streaming** calls get a reader that reports every message, then the trailer.
//!   [`Engine::stop`] makes the reader return at once.
//! * **Bidirectional** calls get both. On [`Engine::stop`] the writer flushes and closes the
//!   send side while the reader drains what the peer still sends.
//!
//! Exactly one party owns the end of a session (the unary call or the session's driver task)
//! and only that party closes it, so every session produces exactly one `end` event.
//!
//! ## Failures
//!
//! Every failure, including a panic inside a dispatch or a worker, becomes one `data` event
//! whose body is the error text (plus the peer's trailer for RPC errors), followed by one
//! `end` event. Operations on unknown, stopped or closed sessions are logged and ignored.
//!
//! ## Example
//!
//! ```rust,no_run
//! use uprpc_core::engine::{ChannelSink, Engine, EngineConfig};
//! use uprpc_core::envelope::RequestEnvelope;
//! use uprpc_core::descriptor::StreamingMode;
//!
//! # async fn run() {
//! let (sink, mut events) = ChannelSink::new();
//! let engine = Engine::new(sink, EngineConfig::default());
//!
//! engine
//!     .send(RequestEnvelope {
//!         id: "r1".into(),
//!         proto_path: "greeter.proto".into(),
//!         include_dirs: vec![],
//!         service_full_name: "Greeter".into(),
//!         method_name: "SayHello".into(),
//!         mode: StreamingMode::Unary,
//!         host: "127.0.0.1:50051".into(),
//!         body: r#"{"name":"world"}"#.into(),
//!         metadata: vec![],
//!     })
//!     .await;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//!     if event.is_end() {
//!         break;
//!     }
//! }
//! # }
//! ```
mod config;
mod events;
mod workers;

pub use config::EngineConfig;
pub use events::{ChannelSink, Event, EventSink};

use crate::codec::{self, CodecError, Direction, MetadataPair};
use crate::descriptor::{self, LookupError, ProtoParseError, ResolveError, StreamingMode};
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::grpc::client::{CallOptions, GrpcClient, GrpcRequestError};
use crate::session::{ConnectionError, Opened, Session, SessionError, SessionRegistry};
use futures_util::FutureExt;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tonic::Response;
use workers::OnStop;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Parse(#[from] ProtoParseError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("rpc error: code = {:?} desc = {}", .0.code(), .0.message())]
    Rpc(#[from] tonic::Status),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ResolveError> for EngineError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Parse(e) => EngineError::Parse(e),
            ResolveError::Lookup(e) => EngineError::Lookup(e),
        }
    }
}

impl EngineError {
    /// Metadata reported next to the error text: the trailer the peer sent with its status.
    pub fn metadata(&self) -> Vec<MetadataPair> {
        match self {
            EngineError::Rpc(status) => {
                codec::metadata_to_pairs(status.metadata(), Direction::Response)
            }
            _ => Vec::new(),
        }
    }
}

/// An [`EngineError`] tagged with the session it ended.
#[derive(Debug, thiserror::Error)]
#[error("Session '{id}' failed: {error}")]
pub struct Failure {
    pub id: String,
    #[source]
    pub error: EngineError,
}

impl Failure {
    pub fn new(id: impl Into<String>, error: impl Into<EngineError>) -> Self {
        Self {
            id: id.into(),
            error: error.into(),
        }
    }
}

/// Drives calls for an external caller. Cheap to clone; clones share sessions and sink.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SessionRegistry,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(sink: impl EventSink, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                sink: Arc::new(sink),
                config,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Opens the call described by `envelope`.
    ///
    /// Unary calls complete before this returns. Streaming calls return as soon as the
    /// session is registered; their events follow from background tasks.
    ///
    /// If a client or bidirectional session with the same id is already open, the body is
    /// pushed to it instead.
    pub async fn send(&self, envelope: RequestEnvelope) {
        let id = envelope.id.clone();

        match AssertUnwindSafe(self.dispatch(envelope)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(Dispatch::Rejected(failure))) => self.reject(failure),
            Ok(Err(Dispatch::Failed(failure))) => self.report(failure),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(session = %id, panic = %message, "dispatch panicked");
                self.report(Failure::new(id, EngineError::Internal(message)));
            }
        }
    }

    /// Feeds one more message to an open client or bidirectional session.
    ///
    /// A body that does not match the input type is reported as a `data` error and the
    /// session stays open. Unknown, stopped or closed ids are ignored.
    pub async fn push(&self, id: &str, body: &str) {
        match self.inner.registry.get(id) {
            Some(session) => self.push_to(&session, body).await,
            None => absorb(id, SessionError::Unknown(id.to_string())),
        }
    }

    /// Asks a streaming session to wind down gracefully. Never blocks.
    ///
    /// Unknown ids, sessions already stopping and unary calls are ignored.
    pub fn stop(&self, id: &str) {
        match self.inner.registry.get(id) {
            None => absorb(id, SessionError::Unknown(id.to_string())),
            Some(session) if session.mode() == StreamingMode::Unary => {
                tracing::debug!(session = %id, "stop ignored, unary calls have no worker");
            }
            Some(session) => {
                if !session.request_stop() {
                    absorb(id, SessionError::Stopped(id.to_string()));
                }
            }
        }
    }

    /// Stops every open streaming session.
    pub fn shutdown(&self) {
        let sessions = self.inner.registry.snapshot();
        tracing::debug!(sessions = sessions.len(), "shutting down");

        for session in sessions {
            if session.mode() != StreamingMode::Unary {
                session.request_stop();
            }
        }
    }

    async fn dispatch(&self, envelope: RequestEnvelope) -> Result<(), Dispatch> {
        let id = envelope.id.as_str();
        tracing::debug!(
            session = %id,
            mode = %envelope.mode,
            host = %envelope.host,
            method = %format!("{}/{}", envelope.service_full_name, envelope.method_name),
            "dispatch"
        );

        if let Some(session) = self.inner.registry.get(id) {
            self.send_to_existing(&session, &envelope.body).await;
            return Ok(());
        }

        // Nothing is registered until the method, the metadata and the host all check out.
        let method = self.resolve(&envelope).map_err(Dispatch::rejected(id))?;
        let metadata =
            codec::pairs_to_metadata(&envelope.metadata).map_err(Dispatch::rejected(id))?;

        let opened = self
            .inner
            .registry
            .open(
                id,
                envelope.mode,
                &envelope.host,
                self.inner.config.connect_timeout,
            )
            .await
            .map_err(Dispatch::rejected(id))?;

        let session = match opened {
            Opened::Created(session) => session,
            Opened::Existing(session) => {
                self.send_to_existing(&session, &envelope.body).await;
                return Ok(());
            }
        };

        let options = CallOptions {
            metadata,
            timeout: self.inner.config.call_timeout,
        };

        let body = envelope.body.as_str();
        let opened = match envelope.mode {
            StreamingMode::Unary => self.unary(&session, method, body, options).await,
            StreamingMode::ClientStreaming => {
                self.open_client_stream(session, method, body, options).await
            }
            StreamingMode::ServerStreaming => {
                self.open_server_stream(session, method, body, options).await
            }
            StreamingMode::Bidirectional => {
                self.open_bidirectional(session, method, body, options).await
            }
        };

        opened.map_err(|e| Dispatch::Failed(Failure::new(id, e)))
    }

    /// A send whose id is already registered: pushed for client and bidirectional sessions,
    /// ignored otherwise.
    async fn send_to_existing(&self, session: &Session, body: &str) {
        if session.mode().accepts_pushes() {
            self.push_to(session, body).await;
        } else {
            absorb(
                session.id(),
                SessionError::NotStreaming {
                    id: session.id().to_string(),
                    mode: session.mode(),
                },
            );
        }
    }

    fn resolve(&self, envelope: &RequestEnvelope) -> Result<MethodDescriptor, EngineError> {
        let method = descriptor::resolve(
            &envelope.proto_path,
            &envelope.include_dirs,
            &envelope.service_full_name,
            &envelope.method_name,
        )?;
        descriptor::ensure_mode(&method, envelope.mode)?;
        Ok(method)
    }

    async fn unary(
        &self,
        session: &Session,
        method: MethodDescriptor,
        body: &str,
        options: CallOptions,
    ) -> Result<(), EngineError> {
        let message = codec::encode(&method.input(), body)?;
        let mut client = self.client(session)?;
        session.activate(method.clone(), None);

        let deadline = workers::call_deadline(&options);
        let response = workers::within(deadline, async {
            Ok(client.unary(&method, message, options).await??)
        })
        .await?;
        self.deliver(session.id(), response)?;
        self.finish(session.id());
        Ok(())
    }

    async fn open_client_stream(
        &self,
        session: Arc<Session>,
        method: MethodDescriptor,
        body: &str,
        options: CallOptions,
    ) -> Result<(), EngineError> {
        let client = self.client(&session)?;
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity());
        self.queue_initial(&method, body, &queue_tx).await?;
        session.activate(method.clone(), Some(queue_tx));

        let work = workers::client_stream(
            self.clone(),
            session.clone(),
            client,
            method,
            queue_rx,
            options,
        );
        self.spawn_worker(session, work);
        Ok(())
    }

    async fn open_server_stream(
        &self,
        session: Arc<Session>,
        method: MethodDescriptor,
        body: &str,
        options: CallOptions,
    ) -> Result<(), EngineError> {
        let message = codec::encode(&method.input(), body)?;
        let mut client = self.client(&session)?;
        session.activate(method.clone(), None);

        let deadline = workers::call_deadline(&options);
        let stream = workers::within(deadline, async {
            Ok(client.server_streaming(&method, message, options).await??)
        })
        .await?
        .into_inner();

        let engine = self.clone();
        let reader = session.clone();
        self.spawn_worker(session, async move {
            workers::read_inbound(&engine, &reader, stream, OnStop::Return, deadline).await
        });
        Ok(())
    }

    async fn open_bidirectional(
        &self,
        session: Arc<Session>,
        method: MethodDescriptor,
        body: &str,
        options: CallOptions,
    ) -> Result<(), EngineError> {
        let client = self.client(&session)?;
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity());
        self.queue_initial(&method, body, &queue_tx).await?;
        session.activate(method.clone(), Some(queue_tx));

        let work = workers::bidirectional(
            self.clone(),
            session.clone(),
            client,
            method,
            queue_rx,
            options,
        );
        self.spawn_worker(session, work);
        Ok(())
    }

    async fn push_to(&self, session: &Session, body: &str) {
        match self.try_push(session, body).await {
            Ok(()) => {}
            Err(EngineError::Session(error)) => absorb(session.id(), error),
            Err(error) => {
                tracing::debug!(session = %session.id(), error = %error, "push rejected");
                self.emit_error(session.id(), &error);
            }
        }
    }

    async fn try_push(&self, session: &Session, body: &str) -> Result<(), EngineError> {
        let id = session.id();
        if !session.mode().accepts_pushes() {
            return Err(SessionError::NotStreaming {
                id: id.to_string(),
                mode: session.mode(),
            }
            .into());
        }

        let method = session
            .method()
            .ok_or_else(|| SessionError::NotReady(id.to_string()))?;
        let outbound = session.outbound().ok_or_else(|| {
            if session.is_closed() {
                SessionError::Closed(id.to_string())
            } else {
                SessionError::Stopped(id.to_string())
            }
        })?;

        let message = codec::encode(&method.input(), body)?;
        outbound
            .send(message)
            .await
            .map_err(|_| SessionError::Closed(id.to_string()))?;
        Ok(())
    }

    /// Queues a non-blank initial body as the first outbound message.
    async fn queue_initial(
        &self,
        method: &MethodDescriptor,
        body: &str,
        queue: &mpsc::Sender<DynamicMessage>,
    ) -> Result<(), EngineError> {
        if body.trim().is_empty() {
            return Ok(());
        }

        let message = codec::encode(&method.input(), body)?;
        queue
            .send(message)
            .await
            .map_err(|_| EngineError::Internal("handoff queue closed before use".to_string()))
    }

    fn client(&self, session: &Session) -> Result<GrpcClient, EngineError> {
        session
            .channel()
            .map(GrpcClient::new)
            .ok_or_else(|| SessionError::Closed(session.id().to_string()).into())
    }

    fn queue_capacity(&self) -> usize {
        self.inner.config.queue_capacity.max(1)
    }

    /// Runs `work` as the session's terminal owner: success closes the session, an error or
    /// a panic is reported first.
    fn spawn_worker<F>(&self, session: Arc<Session>, work: F)
    where
        F: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let engine = self.clone();
        let id = session.id().to_string();
        drop(session);

        tokio::spawn(async move {
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => {
                    engine.finish(&id);
                }
                Ok(Err(error)) => engine.report(Failure::new(id, error)),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(session = %id, panic = %message, "worker panicked");
                    engine.report(Failure::new(id, EngineError::Internal(message)));
                }
            }
        });
    }

    /// Emits the single-message result of a unary or client streaming call.
    pub(crate) fn deliver(
        &self,
        id: &str,
        response: Response<DynamicMessage>,
    ) -> Result<(), EngineError> {
        let metadata = codec::metadata_to_pairs(response.metadata(), Direction::Response);
        let body = codec::decode(response.get_ref())?;
        self.emit(id, body, metadata);
        Ok(())
    }

    pub(crate) fn emit(&self, id: &str, body: String, metadata: Vec<MetadataPair>) {
        self.inner
            .sink
            .data(ResponseEnvelope::new(id, body, metadata));
    }

    fn emit_error(&self, id: &str, error: &EngineError) {
        self.emit(id, error.to_string(), error.metadata());
    }

    /// Closes the session and emits `end` if this call was the one that closed it.
    fn finish(&self, id: &str) -> bool {
        if self.inner.registry.close(id) {
            self.inner.sink.end(id);
            true
        } else {
            false
        }
    }

    /// Emits the error and ends the session this send registered.
    fn report(&self, failure: Failure) {
        let Failure { id, error } = failure;
        tracing::debug!(session = %id, error = %error, "call failed");

        self.emit_error(&id, &error);
        if !self.finish(&id) {
            self.inner.sink.end(&id);
        }
    }

    /// Emits the error and `end` for a send that failed before registering a session.
    ///
    /// If another send registered the id in the meantime, that session owns its `end`, so
    /// this failure is only logged.
    fn reject(&self, failure: Failure) {
        let Failure { id, error } = failure;
        if self.inner.registry.get(&id).is_some() {
            tracing::warn!(session = %id, error = %error, "ignored, the id is taken");
            return;
        }

        tracing::debug!(session = %id, error = %error, "call rejected");
        self.emit_error(&id, &error);
        self.inner.sink.end(&id);
    }
}

/// How a dispatch failed: before or after it registered its session.
enum Dispatch {
    Rejected(Failure),
    Failed(Failure),
}

impl Dispatch {
    fn rejected<E: Into<EngineError>>(id: &str) -> impl FnOnce(E) -> Dispatch + '_ {
        move |error| Dispatch::Rejected(Failure::new(id, error))
    }
}

fn absorb(id: &str, error: SessionError) {
    tracing::warn!(session = %id, error = %error, "ignored");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
