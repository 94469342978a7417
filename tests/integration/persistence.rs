//! Usage persistence tests
//!
//! Counts are restored before the first request and checkpointed as keys
//! are selected. The Redis tests skip when no server is reachable.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::common::{auth_header, test_config, TestGateway};
use crate::mocks::MockUpstream;
use crate::skip_if_no_redis;
use gemini_gateway::persistence::{InMemoryUsageStore, RedisUsageStore};

async fn send_requests(gateway: &TestGateway, count: usize) {
    let (name, value) = auth_header();
    for _ in 0..count {
        gateway
            .server
            .post("/v1beta/models/gemini-2.0-flash:generateContent")
            .add_header(name.clone(), value.clone())
            .json(&serde_json::json!({ "contents": [] }))
            .await
            .assert_status_ok();
    }
}

#[tokio::test]
async fn test_restored_counts_steer_selection() {
    let upstream = MockUpstream::start().await;
    upstream.mock_generate_success().await;
    let backend = Arc::new(InMemoryUsageStore::with_counts([("k1", 10), ("k2", 10)]));
    let gateway = TestGateway::start_with_persistence(
        test_config(&upstream.uri(), "k1,k2,k3"),
        Some(backend.clone()),
    )
    .await;

    assert_eq!(gateway.usage("k1"), 10);
    assert_eq!(gateway.usage("k3"), 0);

    send_requests(&gateway, 5).await;

    assert_eq!(upstream.received_api_keys().await, vec!["k3"; 5]);
    assert_eq!(gateway.usage("k3"), 5);
}

#[tokio::test]
async fn test_usage_checkpointed_on_shutdown() {
    let upstream = MockUpstream::start().await;
    upstream.mock_generate_success().await;
    let backend = Arc::new(InMemoryUsageStore::new());
    let gateway = TestGateway::start_with_persistence(
        test_config(&upstream.uri(), "k1,k2"),
        Some(backend.clone()),
    )
    .await;

    send_requests(&gateway, 4).await;
    gateway.state.shutdown().await;

    assert_eq!(backend.get("k1"), Some(2));
    assert_eq!(backend.get("k2"), Some(2));
}

#[tokio::test]
async fn test_failing_backend_does_not_fail_requests() {
    let upstream = MockUpstream::start().await;
    upstream.mock_generate_success().await;
    let backend = Arc::new(InMemoryUsageStore::new());
    backend.set_failing(true);
    let gateway = TestGateway::start_with_persistence(
        test_config(&upstream.uri(), "k1,k2"),
        Some(backend.clone()),
    )
    .await;

    send_requests(&gateway, 3).await;
    gateway.state.shutdown().await;

    assert_eq!(backend.write_count(), 0);
    assert_eq!(gateway.usage("k1") + gateway.usage("k2"), 3);
}

#[tokio::test]
async fn test_redis_restore_and_checkpoint() {
    let redis = skip_if_no_redis!();
    redis.seed("k1", 7).await.unwrap();

    let upstream = MockUpstream::start().await;
    upstream.mock_generate_success().await;
    let backend = Arc::new(
        RedisUsageStore::connect(redis.url(), redis.hash_key())
            .await
            .unwrap(),
    );
    let gateway = TestGateway::start_with_persistence(
        test_config(&upstream.uri(), "k1,k2"),
        Some(backend),
    )
    .await;

    assert_eq!(gateway.usage("k1"), 7);

    send_requests(&gateway, 3).await;
    gateway.state.shutdown().await;

    let counts = redis.counts().await.unwrap();
    assert_eq!(counts.get("k1"), Some(&7));
    assert_eq!(counts.get("k2"), Some(&3));

    redis.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_redis_fresh_hash_starts_at_zero() {
    let redis = skip_if_no_redis!();

    let backend = Arc::new(
        RedisUsageStore::connect(redis.url(), redis.hash_key())
            .await
            .unwrap(),
    );
    let gateway = TestGateway::start_with_persistence(
        test_config("http://127.0.0.1:1", "k1,k2"),
        Some(backend),
    )
    .await;

    assert_eq!(gateway.usage("k1"), 0);
    assert_eq!(gateway.usage("k2"), 0);
    redis.cleanup().await.unwrap();
}
