//! Header utilities for upstream proxying
//!
//! Outbound requests start from an empty header set: nothing the client
//! sent (least of all the gateway's own auth header) is copied upstream.

use axum::http::header::{self, HeaderName};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONNECTION};

use super::forwarder::ApiFlavor;
use crate::credentials::Credential;
use crate::error::{AppError, AppResult};

/// Vendor API-key header used by the native API
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Hop-by-hop headers that must never be forwarded
const HOP_BY_HOP_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Build the header set for an upstream request
///
/// Always `Cache-Control: no-cache` and `Connection: keep-alive`, plus
/// exactly one auth header: `Authorization: Bearer` for the
/// OpenAI-compatible API, `x-goog-api-key` for everything else. A key that
/// can't be encoded as a header value fails here, before any dispatch.
pub fn build_upstream_headers(flavor: ApiFlavor, credential: &Credential) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let invalid = |_| AppError::InvalidCredential(credential.masked());
    match flavor {
        ApiFlavor::OpenAiCompatible => {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {}", credential.as_str())).map_err(invalid)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        ApiFlavor::Native => {
            let mut value = HeaderValue::from_str(credential.as_str()).map_err(invalid)?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
        }
    }

    Ok(headers)
}

/// Forward the client's content type, if any
///
/// The body is passed through untouched, so upstream needs to know how to
/// read it.
pub fn copy_content_type(inbound: &HeaderMap, outbound: &mut HeaderMap) {
    if let Some(value) = inbound.get(header::CONTENT_TYPE) {
        outbound.insert(header::CONTENT_TYPE, value.clone());
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(name)
}

/// Filter hop-by-hop headers from a response
///
/// `Content-Length` is dropped too, for bodies the gateway rewrites.
pub fn filter_response_headers(response_headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();

    for (name, value) in response_headers {
        if !is_hop_by_hop_header(name) && name != header::CONTENT_LENGTH {
            filtered.append(name.clone(), value.clone());
        }
    }

    filtered
}

/// Headers for a non-stream body relayed byte for byte
///
/// Same as [`filter_response_headers`] but the upstream `Content-Length`
/// is kept, since the body is not altered.
pub fn passthrough_response_headers(response_headers: &HeaderMap) -> HeaderMap {
    let mut headers = filter_response_headers(response_headers);
    if let Some(length) = response_headers.get(header::CONTENT_LENGTH) {
        headers.insert(header::CONTENT_LENGTH, length.clone());
    }
    headers
}

/// Response headers for a relayed event stream
pub fn sse_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let content_type = upstream
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    headers
}

/// Whether a content type denotes a server-sent event stream
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}
