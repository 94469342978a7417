//! Client authentication tests
//!
//! The shared secret is accepted from the `x-goog-api-key` header, the `key`
//! query parameter, or a bearer token. Nothing reaches the upstream until it
//! matches.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use serde_json::Value;

use crate::common::{auth_header, constants::*, test_config, SpawnedGateway, TestGateway};
use crate::mocks::{MockUpstream, UpstreamTestData};

async fn gateway_with_models() -> (MockUpstream, TestGateway) {
    let upstream = MockUpstream::start().await;
    upstream
        .mock_list_models(UpstreamTestData::model_listing())
        .await;
    let gateway = TestGateway::start(test_config(&upstream.uri(), TEST_API_KEYS)).await;
    (upstream, gateway)
}

#[tokio::test]
async fn test_missing_key_returns_401() {
    let (upstream, gateway) = gateway_with_models().await;

    let response = gateway.server.get("/v1beta/models").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], 401);
    assert_eq!(body["error"]["status"], "UNAUTHENTICATED");
    assert!(upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_wrong_key_returns_403() {
    let (upstream, gateway) = gateway_with_models().await;

    let response = gateway
        .server
        .get("/v1beta/models")
        .add_header(
            HeaderName::from_static(API_KEY_HEADER),
            HeaderValue::from_static("not-the-secret"),
        )
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], "PERMISSION_DENIED");
    assert!(upstream.requests().await.is_empty());
}

#[tokio::test]
async fn test_header_key_accepted() {
    let (_upstream, gateway) = gateway_with_models().await;
    let (name, value) = auth_header();

    let response = gateway
        .server
        .get("/v1beta/models")
        .add_header(name, value)
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_query_key_accepted() {
    let (_upstream, gateway) = gateway_with_models().await;

    let response = gateway
        .server
        .get("/v1beta/models")
        .add_query_param("key", TEST_AUTH_KEY)
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_percent_encoded_query_key_accepted() {
    let upstream = MockUpstream::start().await;
    upstream
        .mock_list_models(UpstreamTestData::model_listing())
        .await;
    let mut config = test_config(&upstream.uri(), TEST_API_KEYS);
    config.auth_key = "p@ss+word".to_string();
    let gateway = SpawnedGateway::start(config).await;

    let response = reqwest::get(gateway.url("/v1beta/models?key=p%40ss%2Bword"))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let requests = upstream.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.query(), None);
}

#[tokio::test]
async fn test_bearer_key_accepted() {
    let (_upstream, gateway) = gateway_with_models().await;

    let response = gateway
        .server
        .get("/v1beta/models")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", TEST_AUTH_KEY)).unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_public_endpoints_need_no_key() {
    let (_upstream, gateway) = gateway_with_models().await;

    gateway.server.get("/health/live").await.assert_status_ok();
    gateway.server.get("/status").await.assert_status_ok();
}
