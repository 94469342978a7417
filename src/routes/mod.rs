//! HTTP routes for the gateway
//!
//! This module defines all HTTP endpoints exposed by the gateway.

pub mod gateway;
pub mod health;
pub mod metrics;
pub mod models;
pub mod status;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{middleware::auth::auth_middleware, AppState};

/// Create the main application router
///
/// No compression layer: it would buffer event streams.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Upstream API surface, behind the client key check
    let gateway_routes = Router::new()
        .route("/v1beta/*path", any(gateway::proxy_handler))
        .route("/v1/*path", any(gateway::proxy_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let gateway_routes = match &state.config.path_prefix {
        Some(prefix) => Router::new().nest(prefix, gateway_routes),
        None => gateway_routes,
    };

    // Public routes (health checks, metrics, key status) - no auth required
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/status", get(status::key_status));

    Router::new()
        .merge(public_routes)
        .merge(gateway_routes)
        .fallback(gateway::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
