//! Outbound request construction
//!
//! Turns an authorized inbound request plus a selected credential into the
//! exact request sent upstream: target URL, header set and body. The body
//! is wrapped as a stream and never read here.

use axum::body::Body;
use axum::http::{HeaderMap, Method};
use tracing::debug;

use super::headers::{build_upstream_headers, copy_content_type};
use crate::config::Config;
use crate::credentials::Credential;
use crate::error::AppResult;

/// Path prefix of the OpenAI-compatible API
pub const OPENAI_COMPAT_PREFIX: &str = "/v1beta/openai";

/// Query parameter reserved for client authentication, never forwarded
pub const RESERVED_QUERY_KEY: &str = "key";

/// Preview model identifiers rewritten to their stable names
pub const MODEL_NAME_MAPPINGS: &[(&str, &str)] =
    &[("gemini-2.5-pro-preview-03-25", "gemini-2.5-pro-exp-03-25")];

/// Which upstream API a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    /// Vendor-native API, authenticated with `x-goog-api-key`
    Native,
    /// OpenAI-compatible API, authenticated with a Bearer token
    OpenAiCompatible,
}

impl ApiFlavor {
    /// Classify an upstream path (prefix already stripped)
    pub fn from_path(path: &str) -> Self {
        if path == OPENAI_COMPAT_PREFIX || path.starts_with(&format!("{}/", OPENAI_COMPAT_PREFIX)) {
            Self::OpenAiCompatible
        } else {
            Self::Native
        }
    }

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::OpenAiCompatible => "openai",
        }
    }
}

/// Timeout class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Listing and lookups; short deadline
    Metadata,
    /// Content generation, possibly streamed; long deadline
    Generation,
}

impl Operation {
    pub fn from_method(method: &Method) -> Self {
        if method == Method::GET || method == Method::HEAD {
            Self::Metadata
        } else {
            Self::Generation
        }
    }
}

/// Fully built upstream request, ready for dispatch
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<reqwest::Body>,
    pub flavor: ApiFlavor,
    pub operation: Operation,
}

/// Builds upstream requests from inbound ones
#[derive(Debug, Clone)]
pub struct RequestForwarder {
    base_url: String,
    path_prefix: Option<String>,
}

impl RequestForwarder {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            path_prefix: config.path_prefix.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Inbound path with the configured gateway prefix removed
    pub fn upstream_path<'a>(&self, path: &'a str) -> &'a str {
        match &self.path_prefix {
            Some(prefix) => match path.strip_prefix(prefix.as_str()) {
                Some(rest) if rest.is_empty() => "/",
                Some(rest) if rest.starts_with('/') => rest,
                _ => path,
            },
            None => path,
        }
    }

    /// Upstream URL for an inbound path and raw query string
    ///
    /// The `key` parameter is removed and model names are mapped. The
    /// remaining query is kept byte-for-byte.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!("{}{}", self.base_url, self.upstream_path(path));
        if let Some(query) = query.and_then(strip_reserved_query) {
            url.push('?');
            url.push_str(&query);
        }
        map_model_names(&url)
    }

    /// Build the outbound request
    ///
    /// Fails before anything is dispatched if the credential can't be
    /// encoded as a header.
    pub fn build(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        inbound_headers: &HeaderMap,
        body: Body,
        credential: &Credential,
    ) -> AppResult<OutboundRequest> {
        let upstream_path = self.upstream_path(path);
        let flavor = ApiFlavor::from_path(upstream_path);
        let operation = Operation::from_method(&method);

        let mut headers = build_upstream_headers(flavor, credential)?;
        let body = if operation == Operation::Metadata {
            None
        } else {
            copy_content_type(inbound_headers, &mut headers);
            Some(reqwest::Body::wrap_stream(body.into_data_stream()))
        };

        let url = self.target_url(path, query);
        debug!(
            url = %url,
            api = flavor.as_str(),
            header_count = headers.len(),
            "Built upstream request"
        );

        Ok(OutboundRequest {
            method,
            url,
            headers,
            body,
            flavor,
            operation,
        })
    }
}

/// Drop every `key` parameter from a raw query string
///
/// Names are compared after percent-decoding, so `k%65y` counts as `key`.
/// Kept pairs are forwarded byte for byte. Returns `None` when nothing is
/// left.
pub fn strip_reserved_query(query: &str) -> Option<String> {
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| !is_reserved_pair(pair))
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}

fn is_reserved_pair(pair: &str) -> bool {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(pair) {
        Ok(decoded) => decoded.iter().any(|(name, _)| name == RESERVED_QUERY_KEY),
        // Undecodable pairs are never forwarded
        Err(_) => true,
    }
}

/// Apply [`MODEL_NAME_MAPPINGS`] to a URL
pub fn map_model_names(url: &str) -> String {
    MODEL_NAME_MAPPINGS
        .iter()
        .fold(url.to_string(), |url, (from, to)| url.replace(from, to))
}
