//! Upstream dispatch and response relay
//!
//! Sends a built [`OutboundRequest`] and turns the upstream response into
//! the client response. Successful bodies, JSON or SSE, are streamed through
//! [`relay_stream`] as they arrive. Error bodies are read (bounded) so they
//! can be relayed whole or wrapped in the error envelope.
//!
//! Every upstream call races three things: the call itself, the request's
//! deadline and the client's cancellation. Whichever finishes first wins,
//! and losing futures are dropped, which aborts the upstream connection.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Response};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::time::Instant;

use super::forwarder::{Operation, OutboundRequest};
use super::headers::{
    filter_response_headers, is_event_stream, passthrough_response_headers, sse_response_headers,
};
use super::logging::RequestContext;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::streaming::{relay_stream, CancelHandle, DisconnectGuard};

/// Largest upstream error body read into memory
pub const ERROR_BODY_LIMIT: usize = 1024 * 1024;

/// Largest model listing read into memory for filtering
pub const MODEL_LIST_LIMIT: usize = 8 * 1024 * 1024;

/// Per-operation upstream deadlines
#[derive(Debug, Clone, Copy)]
pub struct RelayTimeouts {
    pub metadata: Duration,
    pub generation: Duration,
}

impl RelayTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            metadata: config.metadata_timeout,
            generation: config.generation_timeout,
        }
    }

    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Metadata => self.metadata,
            Operation::Generation => self.generation,
        }
    }
}

/// An upstream response whose head has arrived
pub struct Dispatched {
    pub response: reqwest::Response,
    /// Deadline still applying to the body
    pub deadline: Instant,
}

/// Performs upstream calls and relays their responses
pub struct StreamRelay {
    client: reqwest::Client,
    timeouts: RelayTimeouts,
}

impl StreamRelay {
    /// Create a relay with its own pooled HTTP client
    ///
    /// No global client timeout is set; deadlines are per request.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self::with_client(client, RelayTimeouts::from_config(config)))
    }

    pub fn with_client(client: reqwest::Client, timeouts: RelayTimeouts) -> Self {
        Self { client, timeouts }
    }

    pub fn timeouts(&self) -> RelayTimeouts {
        self.timeouts
    }

    /// Send the request and wait for the response head
    ///
    /// Fails with `ClientCancelled` if `cancel` fires first, `UpstreamTimeout`
    /// once the operation's deadline passes and `UpstreamUnreachable` on
    /// connection errors.
    pub async fn dispatch(
        &self,
        outbound: OutboundRequest,
        cancel: &CancelHandle,
        ctx: &RequestContext,
    ) -> AppResult<Dispatched> {
        let timeout = self.timeouts.for_operation(outbound.operation);
        let deadline = Instant::now() + timeout;

        let mut request = self
            .client
            .request(outbound.method, outbound.url.as_str())
            .headers(outbound.headers);
        if let Some(body) = outbound.body {
            request = request.body(body);
        }

        ctx.log_upstream_request(&outbound.url, timeout.as_secs());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                ctx.log_client_disconnected(0);
                Err(AppError::ClientCancelled)
            }
            _ = tokio::time::sleep_until(deadline) => {
                ctx.log_timeout(timeout.as_secs());
                Err(AppError::UpstreamTimeout)
            }
            result = request.send() => match result {
                Ok(response) => {
                    let content_type = response
                        .headers()
                        .get(header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok());
                    ctx.log_upstream_response(response.status().as_u16(), content_type);
                    Ok(Dispatched { response, deadline })
                }
                Err(e) if e.is_timeout() => {
                    ctx.log_timeout(timeout.as_secs());
                    Err(AppError::UpstreamTimeout)
                }
                Err(e) => {
                    ctx.log_connection_error(&e.to_string(), &outbound.url);
                    Err(AppError::UpstreamUnreachable(e.without_url().to_string()))
                }
            },
        }
    }

    /// Turn an upstream response into the client response
    ///
    /// Success bodies are streamed; `guard` moves into the body stream and
    /// lives until the client has read it all or gone away.
    pub async fn relay(
        &self,
        dispatched: Dispatched,
        guard: DisconnectGuard,
        ctx: &RequestContext,
    ) -> AppResult<Response<Body>> {
        let Dispatched { response, deadline } = dispatched;
        let status = response.status();

        if !status.is_success() {
            return relay_error(response, deadline, guard, ctx).await;
        }

        let headers = if is_event_stream(response.headers()) {
            sse_response_headers(response.headers())
        } else {
            passthrough_response_headers(response.headers())
        };

        let body = Body::from_stream(relay_stream(
            response.bytes_stream(),
            guard,
            deadline,
            ctx.clone(),
        ));

        let mut relayed = Response::new(body);
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }

    /// Relay a successful body after passing it through `transform`
    ///
    /// Only for small metadata responses: the body is read whole, up to
    /// [`MODEL_LIST_LIMIT`]. Error responses are handled as in `relay`.
    pub async fn relay_transformed<F>(
        &self,
        dispatched: Dispatched,
        guard: DisconnectGuard,
        ctx: &RequestContext,
        transform: F,
    ) -> AppResult<Response<Body>>
    where
        F: FnOnce(&[u8]) -> Bytes,
    {
        let Dispatched { response, deadline } = dispatched;
        let status = response.status();

        if !status.is_success() {
            return relay_error(response, deadline, guard, ctx).await;
        }

        let mut headers = filter_response_headers(response.headers());
        let (body, truncated) =
            read_bounded(response, MODEL_LIST_LIMIT, deadline, guard.handle()).await?;
        if truncated {
            return Err(AppError::Internal(anyhow::anyhow!(
                "upstream response exceeds {} bytes",
                MODEL_LIST_LIMIT
            )));
        }
        guard.complete();

        let transformed = transform(&body);
        if !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        ctx.log_stream_ended(1, transformed.len() as u64);

        let mut relayed = Response::new(Body::from(transformed));
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }

    /// Dispatch and relay in one step
    pub async fn forward(
        &self,
        outbound: OutboundRequest,
        guard: DisconnectGuard,
        ctx: &RequestContext,
    ) -> AppResult<Response<Body>> {
        let dispatched = self.dispatch(outbound, guard.handle(), ctx).await?;
        self.relay(dispatched, guard, ctx).await
    }
}

/// Relay a non-2xx upstream response
///
/// JSON error documents go back verbatim with the upstream status. Anything
/// else is wrapped in the error envelope, keeping the upstream status.
async fn relay_error(
    response: reqwest::Response,
    deadline: Instant,
    guard: DisconnectGuard,
    ctx: &RequestContext,
) -> AppResult<Response<Body>> {
    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();

    let (body, _) = read_bounded(response, ERROR_BODY_LIMIT, deadline, guard.handle()).await?;
    guard.complete();

    if serde_json::from_slice::<serde_json::Value>(&body).is_ok() {
        ctx.log_warning(&format!("upstream returned {}", status.as_u16()));
        let mut relayed = Response::new(Body::from(body));
        *relayed.status_mut() = status;
        relayed.headers_mut().insert(
            header::CONTENT_TYPE,
            content_type.unwrap_or_else(|| HeaderValue::from_static("application/json")),
        );
        return Ok(relayed);
    }

    let text = String::from_utf8_lossy(&body).trim().to_string();
    let message = if text.is_empty() {
        format!(
            "Upstream responded with {}",
            status.canonical_reason().unwrap_or("an error")
        )
    } else {
        text
    };
    ctx.log_warning(&format!("upstream returned {}: {}", status.as_u16(), message));

    Err(AppError::UpstreamError { status, message })
}

/// Read at most `limit` bytes of a response body
///
/// Returns the bytes and whether the body was cut short. Honors the deadline
/// and the request's cancellation like the dispatch does.
async fn read_bounded(
    response: reqwest::Response,
    limit: usize,
    deadline: Instant,
    cancel: &CancelHandle,
) -> AppResult<(Bytes, bool)> {
    let mut stream = response.bytes_stream();
    let mut buf = BytesMut::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::ClientCancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(AppError::UpstreamTimeout),
            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    let room = limit - buf.len();
                    if chunk.len() > room {
                        buf.extend_from_slice(&chunk[..room]);
                        return Ok((buf.freeze(), true));
                    }
                    buf.extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    return Err(AppError::UpstreamUnreachable(e.without_url().to_string()));
                }
                None => return Ok((buf.freeze(), false)),
            },
        }
    }
}
