//! Response body relay and client-disconnect propagation
//!
//! Upstream bodies are forwarded chunk by chunk as they arrive, never
//! accumulated. Each request owns a [`DisconnectGuard`]; when the client
//! goes away axum drops the response body (and the guard with it), which
//! fires the request's [`CancelHandle`] and stops any upstream work still
//! in flight.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::proxy::logging::RequestContext;
use crate::routes::metrics::{record_stream_chunks, stream_closed, stream_opened};

/// Cancellation signal shared by everything serving one request
#[derive(Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
    /// Set once the response was fully delivered
    completed: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation, unless the response already completed
    pub fn cancel(&self) {
        if !self.is_completed() {
            let _ = self.sender.send(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender gone without cancelling: never resolves.
            std::future::pending::<()>().await;
        }
    }

    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels its handle when dropped before the response completed
///
/// Lives as long as the request: first in the handler, then inside the
/// relayed body stream.
pub struct DisconnectGuard {
    handle: CancelHandle,
}

impl DisconnectGuard {
    pub fn new(handle: CancelHandle) -> Self {
        stream_opened();
        Self { handle }
    }

    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }

    /// Mark the response as delivered; dropping the guard is then a no-op
    pub fn complete(&self) {
        self.handle.mark_completed();
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        stream_closed();
        if !self.handle.is_completed() {
            debug!("Request dropped before completion, cancelling upstream work");
            self.handle.cancel();
        }
    }
}

enum Step<E> {
    Cancelled,
    DeadlineExceeded,
    Next(Option<Result<Bytes, E>>),
}

/// Relay an upstream body to the client without buffering
///
/// Every upstream chunk is yielded as soon as it arrives, byte-for-byte.
/// The stream ends:
/// - normally when upstream ends, marking the guard completed
/// - silently when the request is cancelled
/// - with an error when upstream fails or `deadline` passes, so the
///   client connection is aborted rather than closed cleanly
pub fn relay_stream<S, E>(
    upstream: S,
    guard: DisconnectGuard,
    deadline: Instant,
    ctx: RequestContext,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let handle = guard.handle().clone();
        let mut chunks: u64 = 0;
        let mut bytes: u64 = 0;

        loop {
            let step = tokio::select! {
                biased;
                _ = handle.cancelled() => Step::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Step::DeadlineExceeded,
                next = upstream.next() => Step::Next(next),
            };

            match step {
                Step::Cancelled => {
                    ctx.log_client_disconnected(chunks);
                    break;
                }
                Step::DeadlineExceeded => {
                    ctx.log_warning("upstream deadline exceeded during body relay");
                    yield Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "upstream deadline exceeded",
                    ));
                    break;
                }
                Step::Next(Some(Ok(chunk))) => {
                    chunks += 1;
                    bytes += chunk.len() as u64;
                    record_stream_chunks(1);
                    yield Ok(chunk);
                }
                Step::Next(Some(Err(e))) => {
                    ctx.log_error(&format!("upstream stream failed after {} chunks: {}", chunks, e));
                    yield Err(io::Error::other(e.to_string()));
                    break;
                }
                Step::Next(None) => {
                    guard.complete();
                    ctx.log_stream_ended(chunks, bytes);
                    break;
                }
            }
        }
    }
}
