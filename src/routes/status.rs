//! Key usage status endpoint
//!
//! Reports how often each upstream key has been used. Keys are masked.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::credentials::MaskedUsageStat;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub key_count: usize,
    pub total_usage: u64,
    /// Usage backend name, or `disabled`
    pub persistence: &'static str,
    /// Per-key usage, most used first
    pub keys: Vec<MaskedUsageStat>,
}

pub async fn key_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let stats = state.selector.stats();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        key_count: stats.len(),
        total_usage: stats.iter().map(|s| s.count).sum(),
        persistence: state
            .persistence
            .as_ref()
            .map(|backend| backend.name())
            .unwrap_or("disabled"),
        keys: stats.iter().map(MaskedUsageStat::from).collect(),
    })
}
