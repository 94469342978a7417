//! Request logging utilities for upstream proxying
//!
//! Structured logging with a short correlation ID so one request can be
//! followed from arrival through key selection, upstream dispatch and the
//! end of the relayed body.

use std::time::Instant;
use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

use crate::credentials::Credential;

/// Context for tracking a request through the gateway
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request (for log correlation)
    pub trace_id: String,
    /// When the request started
    pub start_time: Instant,
    pub method: String,
    /// Inbound path, prefix included
    pub path: String,
    /// API flavor label (`native` or `openai`)
    pub api: &'static str,
    /// Masked form of the selected upstream key
    pub key: Option<String>,
}

impl RequestContext {
    /// Create a new request context
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string()[..8].to_string(),
            start_time: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
            api: "native",
            key: None,
        }
    }

    pub fn with_api(mut self, api: &'static str) -> Self {
        self.api = api;
        self
    }

    /// Record the selected credential; only the masked form is kept
    pub fn set_credential(&mut self, credential: &Credential) {
        self.key = Some(credential.masked());
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Log request initiation
    pub fn log_request_start(&self) {
        info!(
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
            api = self.api,
            key = ?self.key,
            "Request started"
        );
    }

    /// Log request being sent to upstream
    pub fn log_upstream_request(&self, url: &str, timeout_secs: u64) {
        debug!(
            trace_id = %self.trace_id,
            url = %url,
            timeout_secs,
            elapsed_ms = %self.elapsed_ms(),
            "Sending request to upstream"
        );
    }

    /// Log response head received from upstream
    pub fn log_upstream_response(&self, status: u16, content_type: Option<&str>) {
        info!(
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
            status = %status,
            content_type = ?content_type,
            elapsed_ms = %self.elapsed_ms(),
            "Response received from upstream"
        );
    }

    /// Log the body relay finishing normally
    pub fn log_stream_ended(&self, chunks: u64, bytes: u64) {
        info!(
            trace_id = %self.trace_id,
            path = %self.path,
            chunks,
            bytes,
            elapsed_ms = %self.elapsed_ms(),
            "Response relay completed"
        );
    }

    /// Log the client going away mid-request
    pub fn log_client_disconnected(&self, chunks: u64) {
        info!(
            trace_id = %self.trace_id,
            path = %self.path,
            chunks,
            elapsed_ms = %self.elapsed_ms(),
            "Client disconnected, upstream request cancelled"
        );
    }

    /// Log a warning condition
    pub fn log_warning(&self, message: &str) {
        warn!(
            trace_id = %self.trace_id,
            path = %self.path,
            elapsed_ms = %self.elapsed_ms(),
            message = %message,
            "Warning during request"
        );
    }

    /// Log request failure
    pub fn log_error(&self, error: &str) {
        error!(
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
            key = ?self.key,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Request failed"
        );
    }

    /// Log connection error
    pub fn log_connection_error(&self, error: &str, url: &str) {
        error!(
            trace_id = %self.trace_id,
            url = %url,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Connection to upstream failed"
        );
    }

    /// Log timeout
    pub fn log_timeout(&self, timeout_secs: u64) {
        error!(
            trace_id = %self.trace_id,
            path = %self.path,
            timeout_secs,
            elapsed_ms = %self.elapsed_ms(),
            "Upstream request timed out"
        );
    }

    /// Create a tracing span for this request
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "gateway_request",
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
            api = self.api,
        )
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("GET", "/")
    }
}
