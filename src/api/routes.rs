use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use super::stats::{actions, campaigns, sources, summary, StatsState};
use super::track::{health_check, track, TrackState};

/// Public beacon router. Browsers send beacons cross-origin from profile
/// pages, so CORS is wide open here.
pub fn create_track_router(state: Arc<TrackState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/t", post(track))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn create_api_router(state: Arc<StatsState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats/{entity_id}/summary", get(summary))
        .route("/api/stats/{entity_id}/actions", get(actions))
        .route("/api/stats/{entity_id}/sources", get(sources))
        .route("/api/stats/{entity_id}/campaigns", get(campaigns))
        .with_state(state)
}
