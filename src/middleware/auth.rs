//! Authentication middleware
//!
//! Checks the client's shared secret before any credential is selected.
//! The secret is accepted from, in order: the `x-goog-api-key` header, the
//! `key` query parameter, or an `Authorization: Bearer` header.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument, warn};

use crate::{
    error::AppError,
    proxy::{forwarder::RESERVED_QUERY_KEY, headers::API_KEY_HEADER},
    AppState,
};

/// Extract the Authorization header and return the bearer token
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim)
}

/// Extract the percent-decoded `key` parameter from a raw query string
pub fn extract_query_key(query: &str) -> Option<String> {
    let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok()?;
    pairs
        .into_iter()
        .find(|(name, _)| name == RESERVED_QUERY_KEY)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Find the client-supplied secret in a request
pub fn extract_client_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    from_header
        .or_else(|| query.and_then(extract_query_key))
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(extract_bearer_token)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
}

/// Authentication middleware
///
/// Missing secret → 401, wrong secret → 403.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = extract_client_key(request.headers(), request.uri().query())
        .ok_or(AppError::Unauthorized)?;

    if provided != state.config.auth_key {
        warn!("Rejected request with an invalid client key");
        return Err(AppError::Forbidden);
    }

    debug!("Client authenticated");
    Ok(next.run(request).await)
}
