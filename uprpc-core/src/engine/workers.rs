//! Background workers of streaming sessions.
//!
//! A writer moves messages from the session's handoff queue onto the call; a reader reports
//! what the peer sends. Both watch the session's stop signal.
use super::{Engine, EngineError};
use crate::codec::{self, Direction};
use crate::grpc::client::{CallOptions, GrpcClient};
use crate::session::{Phase, Session};
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Status, Streaming};

/// What a reader does once the stop signal is raised.
#[derive(Debug, Clone, Copy)]
pub(super) enum OnStop {
    /// Return at once, dropping the rest of the stream.
    Return,
    /// Keep reporting messages until the peer ends the stream or the timeout passes.
    Drain(Duration),
}

/// Client streaming driver: runs the writer next to the call and reports the single reply.
pub(super) async fn client_stream(
    engine: Engine,
    session: Arc<Session>,
    mut client: GrpcClient,
    method: MethodDescriptor,
    queue: mpsc::Receiver<DynamicMessage>,
    options: CallOptions,
) -> Result<(), EngineError> {
    let (call_tx, call_rx) = mpsc::channel(engine.queue_capacity());
    let deadline = call_deadline(&options);

    let writer = forward_outbound(&session, queue, call_tx);
    let call = client.client_streaming(&method, ReceiverStream::new(call_rx), options);

    let response = within(deadline, async {
        tokio::pin!(writer, call);

        // The peer may answer before the send side closes; the writer is dropped then.
        let result = tokio::select! {
            result = &mut call => result,
            () = &mut writer => call.await,
        };
        Ok(result??)
    })
    .await?;

    engine.deliver(session.id(), response)
}

/// Bidirectional driver: the writer runs as its own task while this one reads.
///
/// Returns only once the writer task is gone, so the session is never closed under it.
pub(super) async fn bidirectional(
    engine: Engine,
    session: Arc<Session>,
    mut client: GrpcClient,
    method: MethodDescriptor,
    queue: mpsc::Receiver<DynamicMessage>,
    options: CallOptions,
) -> Result<(), EngineError> {
    let (call_tx, call_rx) = mpsc::channel(engine.queue_capacity());
    let deadline = call_deadline(&options);

    let writer = tokio::spawn({
        let session = session.clone();
        async move { forward_outbound(&session, queue, call_tx).await }
    });

    let drain = OnStop::Drain(engine.config().drain_timeout);
    let call = client.bidirectional_streaming(&method, ReceiverStream::new(call_rx), options);
    let result = match within(deadline, async { Ok(call.await??) }).await {
        Ok(response) => {
            read_inbound(&engine, &session, response.into_inner(), drain, deadline).await
        }
        Err(error) => Err(error),
    };

    // The call is over; whatever the writer still holds has nowhere to go.
    session.request_stop();
    writer.abort();
    if let Err(error) = writer.await
        && !error.is_cancelled()
    {
        tracing::error!(session = %session.id(), error = %error, "writer task failed");
    }

    result
}

/// The instant a call started now must be finished by, if the call has a timeout.
pub(super) fn call_deadline(options: &CallOptions) -> Option<Instant> {
    options.timeout.map(|timeout| Instant::now() + timeout)
}

/// Runs `call`, failing with `DEADLINE_EXCEEDED` if it is still running at `deadline`.
pub(super) async fn within<T>(
    deadline: Option<Instant>,
    call: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    match deadline {
        None => call.await,
        Some(deadline) => timeout_at(deadline, call)
            .await
            .unwrap_or_else(|_| Err(deadline_exceeded())),
    }
}

fn deadline_exceeded() -> EngineError {
    Status::deadline_exceeded("call did not finish before its deadline").into()
}

/// Forwards queued messages onto the call until the stop signal, then flushes what is
/// still queued. Returning drops `call_tx`, which closes the send side of the call.
async fn forward_outbound(
    session: &Session,
    mut queue: mpsc::Receiver<DynamicMessage>,
    call_tx: mpsc::Sender<DynamicMessage>,
) {
    loop {
        tokio::select! {
            biased;
            () = session.stopped() => break,
            next = queue.recv() => match next {
                Some(message) => {
                    if call_tx.send(message).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
        }
    }

    queue.close();
    while let Some(message) = queue.recv().await {
        if call_tx.send(message).await.is_err() {
            return;
        }
    }

    tracing::debug!(session = %session.id(), "send side closed");
}

/// Reports every inbound message, then an empty-bodied event with the trailer.
///
/// Fails with `DEADLINE_EXCEEDED` once `deadline` passes, even while draining.
pub(super) async fn read_inbound(
    engine: &Engine,
    session: &Session,
    mut stream: Streaming<DynamicMessage>,
    on_stop: OnStop,
    deadline: Option<Instant>,
) -> Result<(), EngineError> {
    let id = session.id();
    let mut drain_deadline: Option<Instant> = None;

    loop {
        let next = tokio::select! {
            biased;
            () = session.stopped(), if drain_deadline.is_none() => match on_stop {
                OnStop::Return => {
                    tracing::debug!(session = %id, "reader stopped");
                    return Ok(());
                }
                OnStop::Drain(timeout) => {
                    session.advance(Phase::Draining);
                    drain_deadline = Some(Instant::now() + timeout);
                    continue;
                }
            },
            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                return Err(deadline_exceeded());
            }
            () = sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                if drain_deadline.is_some() =>
            {
                tracing::warn!(session = %id, "peer did not end the stream in time");
                return Ok(());
            }
            next = stream.message() => next,
        };

        match next {
            Ok(Some(message)) => engine.emit(id, codec::decode(&message)?, Vec::new()),
            Ok(None) => {
                let metadata = stream
                    .trailers()
                    .await?
                    .map(|trailers| codec::metadata_to_pairs(&trailers, Direction::Response))
                    .unwrap_or_default();
                engine.emit(id, String::new(), metadata);
                return Ok(());
            }
            Err(status) => return Err(status.into()),
        }
    }
}
