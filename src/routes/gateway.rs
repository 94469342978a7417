//! Gateway proxy handler
//!
//! Catch-all handler for the upstream API. Runs every authorized request
//! through credential selection, request building and the relay, and turns
//! any failure into the JSON error envelope.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{OriginalUri, Request, State},
    http::{request::Parts, Method, Uri},
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::{
    error::{AppError, AppResult},
    proxy::{ApiFlavor, RequestContext},
    routes::{metrics::record_request, models::filter_model_list},
    streaming::{CancelHandle, DisconnectGuard},
    AppState,
};

/// Upstream paths whose listing goes through the model filter
const MODEL_LIST_PATHS: &[&str] = &["/v1beta/models", "/v1/models"];

/// How the upstream response is handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Stream the body through unchanged
    Passthrough,
    /// Read the model listing and drop filtered entries
    ModelList,
}

impl RelayMode {
    pub fn for_request(method: &Method, upstream_path: &str) -> Self {
        let path = upstream_path.trim_end_matches('/');
        if method == Method::GET && MODEL_LIST_PATHS.contains(&path) {
            Self::ModelList
        } else {
            Self::Passthrough
        }
    }
}

/// Proxy handler for everything under `/v1beta` and `/v1`
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let upstream_path = state.forwarder.upstream_path(uri.path());
    let flavor = ApiFlavor::from_path(upstream_path);
    let mode = RelayMode::for_request(&parts.method, upstream_path);

    let mut ctx = RequestContext::new(parts.method.as_str(), uri.path()).with_api(flavor.as_str());
    let span = ctx.create_span();

    let result = proxy_request(&state, &mut ctx, parts, &uri, body, mode)
        .instrument(span)
        .await;

    let response = match result {
        Ok(response) => response,
        Err(AppError::ClientCancelled) => AppError::ClientCancelled.into_response(),
        Err(e) => {
            ctx.log_error(&e.to_string());
            e.into_response()
        }
    };

    record_request(response.status().as_u16(), ctx.api, ctx.elapsed_secs());
    response
}

async fn proxy_request(
    state: &AppState,
    ctx: &mut RequestContext,
    parts: Parts,
    uri: &Uri,
    body: Body,
    mode: RelayMode,
) -> AppResult<Response> {
    let credential = state.selector.next()?;
    ctx.set_credential(&credential);
    ctx.log_request_start();

    let outbound = state.forwarder.build(
        parts.method,
        uri.path(),
        uri.query(),
        &parts.headers,
        body,
        &credential,
    )?;

    let guard = DisconnectGuard::new(CancelHandle::new());
    let dispatched = state.relay.dispatch(outbound, guard.handle(), ctx).await?;

    match mode {
        RelayMode::Passthrough => state.relay.relay(dispatched, guard, ctx).await,
        RelayMode::ModelList => {
            let excluded = &state.config.excluded_models;
            state
                .relay
                .relay_transformed(dispatched, guard, ctx, |body| {
                    filter_model_list(body, excluded)
                })
                .await
        }
    }
}

/// Fallback for unknown routes
pub async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
