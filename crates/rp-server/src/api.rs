//! Health and statistics HTTP surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use rp_core::ingest::StatsSnapshot;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the API router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/v1/stats", get(get_stats))
        .route("/v1/loops", get(get_loops))
        .layer(TraceLayer::new_for_http())
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.stats())
}

/// Last time each background loop reported in.
async fn get_loops(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, DateTime<Utc>>> {
    Json(state.loop_heartbeats())
}
