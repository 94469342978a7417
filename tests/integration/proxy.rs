//! Request forwarding tests
//!
//! Covers what the upstream receives (URL, headers, body) and how upstream
//! failures surface to the client.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{auth_header, constants::*, test_config, SpawnedGateway, TestGateway};
use crate::mocks::{MockUpstream, UpstreamTestData};

fn generate_body() -> Value {
    json!({ "contents": [{ "parts": [{ "text": "Hello" }] }] })
}

#[tokio::test]
async fn test_native_request_forwarded_with_upstream_key() {
    let upstream = MockUpstream::start().await;
    upstream.mock_generate_success().await;
    let gateway = TestGateway::start(test_config(&upstream.uri(), TEST_API_KEYS)).await;
    let (name, value) = auth_header();

    let response = gateway
        .server
        .post("/v1beta/models/gemini-2.0-flash:generateContent")
        .add_header(name, value)
        .add_header(
            HeaderName::from_static("x-custom-header"),
            HeaderValue::from_static("leak-me"),
        )
        .json(&generate_body())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body, UpstreamTestData::generation());
    assert_eq!(
        response.header("content-length").to_str().unwrap(),
        response.text().len().to_string()
    );

    let requests = upstream.requests().await;
    assert_eq!(requests.len(), 1);
    let forwarded = &requests[0];

    assert_eq!(
        forwarded.url.path(),
        "/v1beta/models/gemini-2.0-flash:generateContent"
    );
    let key = forwarded.headers.get(API_KEY_HEADER).unwrap().to_str().unwrap();
    assert!(TEST_API_KEYS.split(',').any(|k| k == key));
    assert_ne!(key, TEST_AUTH_KEY);
    assert!(forwarded.headers.get("authorization").is_none());
    assert!(forwarded.headers.get("x-custom-header").is_none());
    assert_eq!(forwarded.headers.get("cache-control").unwrap(), "no-cache");

    let sent: Value = serde_json::from_slice(&forwarded.body).unwrap();
    assert_eq!(sent, generate_body());
}

#[tokio::test]
async fn test_openai_request_uses_bearer_key() {
    let upstream = MockUpstream::start().await;
    upstream.mock_openai_chat_success().await;
    let gateway = TestGateway::start(test_config(&upstream.uri(), "only-key")).await;
    let (name, value) = auth_header();

    let response = gateway
        .server
        .post("/v1beta/openai/chat/completions")
        .add_header(name, value)
        .json(&json!({
            "model": "gemini-2.0-flash",
            "messages": [{ "role": "user", "content": "Hi" }]
        }))
        .await;

    response.assert_status_ok();

    let requests = upstream.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("authorization").unwrap(),
        "Bearer only-key"
    );
    assert!(requests[0].headers.get(API_KEY_HEADER).is_none());
}

#[tokio::test]
async fn test_client_key_param_never_forwarded() {
    let upstream = MockUpstream::start().await;
    upstream
        .mock_list_models(UpstreamTestData::model_listing())
        .await;
    let gateway = TestGateway::start(test_config(&upstream.uri(), TEST_API_KEYS)).await;

    let response = gateway
        .server
        .get("/v1beta/models")
        .add_query_param("key", TEST_AUTH_KEY)
        .add_query_param("pageSize", "5")
        .await;

    response.assert_status_ok();

    let requests = upstream.requests().await;
    assert_eq!(requests.len(), 1);
    let params: Vec<(String, String)> = requests[0]
        .url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert_eq!(params, vec![("pageSize".to_string(), "5".to_string())]);
}

#[tokio::test]
async fn test_encoded_key_param_never_forwarded() {
    let upstream = MockUpstream::start().await;
    upstream.mock_generate_success().await;
    let gateway = SpawnedGateway::start(test_config(&upstream.uri(), TEST_API_KEYS)).await;

    let response = reqwest::Client::new()
        .post(gateway.url(&format!(
            "/v1beta/models/gemini-2.0-flash:generateContent?k%65y={}&foo=bar&ke%79=x",
            TEST_AUTH_KEY
        )))
        .header(API_KEY_HEADER, TEST_AUTH_KEY)
        .json(&generate_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let requests = upstream.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.query(), Some("foo=bar"));
    assert!(requests[0].url.query_pairs().all(|(name, _)| name != "key"));
}

#[tokio::test]
async fn test_upstream_json_error_relayed_verbatim() {
    let upstream = MockUpstream::start().await;
    upstream
        .mock_json_error(400, UpstreamTestData::invalid_argument())
        .await;
    let gateway = TestGateway::start(test_config(&upstream.uri(), TEST_API_KEYS)).await;
    let (name, value) = auth_header();

    let response = gateway
        .server
        .post("/v1beta/models/gemini-2.0-flash:generateContent")
        .add_header(name, value)
        .json(&generate_body())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body, UpstreamTestData::invalid_argument());
}

#[tokio::test]
async fn test_upstream_text_error_wrapped_in_envelope() {
    let upstream = MockUpstream::start().await;
    upstream.mock_text_error(500, "backend exploded").await;
    let gateway = TestGateway::start(test_config(&upstream.uri(), TEST_API_KEYS)).await;
    let (name, value) = auth_header();

    let response = gateway
        .server
        .post("/v1beta/models/gemini-2.0-flash:generateContent")
        .add_header(name, value)
        .json(&generate_body())
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(
        body,
        json!({
            "error": {
                "code": 500,
                "message": "backend exploded",
                "status": "INTERNAL"
            }
        })
    );
}

#[tokio::test]
async fn test_unreachable_upstream_returns_502() {
    let gateway = TestGateway::start(test_config("http://127.0.0.1:1", TEST_API_KEYS)).await;
    let (name, value) = auth_header();

    let response = gateway
        .server
        .get("/v1beta/models")
        .add_header(name, value)
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], 502);
    assert_eq!(body["error"]["status"], "UNAVAILABLE");
    assert!(!body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("127.0.0.1:1"));
}

#[tokio::test]
async fn test_slow_upstream_returns_504() {
    let upstream = MockUpstream::start().await;
    upstream.mock_slow(Duration::from_secs(3)).await;
    let mut config = test_config(&upstream.uri(), TEST_API_KEYS);
    config.metadata_timeout = Duration::from_millis(300);
    let gateway = TestGateway::start(config).await;
    let (name, value) = auth_header();

    let started = std::time::Instant::now();
    let response = gateway
        .server
        .get("/v1beta/models/gemini-2.0-flash")
        .add_header(name, value)
        .await;

    response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], "DEADLINE_EXCEEDED");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_no_keys_returns_503_without_contacting_upstream() {
    let upstream = MockUpstream::start().await;
    upstream.mock_generate_success().await;
    let gateway = TestGateway::start(test_config(&upstream.uri(), " , ,")).await;
    let (name, value) = auth_header();

    let response = gateway
        .server
        .post("/v1beta/models/gemini-2.0-flash:generateContent")
        .add_header(name, value)
        .json(&generate_body())
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], 503);
    assert_eq!(body["error"]["status"], "UNAVAILABLE");
    assert!(upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_unknown_route_returns_404_envelope() {
    let upstream = MockUpstream::start().await;
    let gateway = TestGateway::start(test_config(&upstream.uri(), TEST_API_KEYS)).await;

    let response = gateway.server.get("/not/a/route").await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], 404);
    assert_eq!(body["error"]["status"], "NOT_FOUND");
}

#[tokio::test]
async fn test_path_prefix_mounts_gateway_routes() {
    let upstream = MockUpstream::start().await;
    upstream
        .mock_list_models(UpstreamTestData::model_listing())
        .await;
    let mut config = test_config(&upstream.uri(), TEST_API_KEYS);
    config.path_prefix = Some("/gemini".to_string());
    let gateway = TestGateway::start(config).await;
    let (name, value) = auth_header();

    let response = gateway
        .server
        .get("/gemini/v1beta/models")
        .add_header(name.clone(), value.clone())
        .await;
    response.assert_status_ok();
    assert_eq!(upstream.requests().await[0].url.path(), "/v1beta/models");

    gateway
        .server
        .get("/v1beta/models")
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
