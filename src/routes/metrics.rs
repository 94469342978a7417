//! Prometheus metrics endpoint
//!
//! Exposes gateway metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;
    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "gateway_requests_total",
        "Total number of proxied requests by final status and API flavor"
    );
    metrics::describe_histogram!(
        "gateway_request_duration_seconds",
        "Time until the upstream response head was relayed"
    );
    metrics::describe_counter!(
        "gateway_credential_selections_total",
        "Total number of upstream API key selections"
    );
    metrics::describe_gauge!(
        "gateway_active_streams",
        "Number of proxied requests currently in flight"
    );
    metrics::describe_counter!(
        "gateway_stream_chunks_total",
        "Total number of body chunks relayed to clients"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a completed proxy request
pub fn record_request(status: u16, api: &str, duration_secs: f64) {
    metrics::counter!(
        "gateway_requests_total",
        "status" => status.to_string(),
        "api" => api.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "api" => api.to_string())
        .record(duration_secs);
}

/// Record one credential selection
pub fn record_credential_selection() {
    metrics::counter!("gateway_credential_selections_total").increment(1);
}

/// Record relayed body chunks
pub fn record_stream_chunks(count: u64) {
    metrics::counter!("gateway_stream_chunks_total").increment(count);
}

pub fn stream_opened() {
    metrics::gauge!("gateway_active_streams").increment(1.0);
}

pub fn stream_closed() {
    metrics::gauge!("gateway_active_streams").decrement(1.0);
}
