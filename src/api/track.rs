//! Beacon ingestion handler
//!
//! `POST /t` always answers `202 accepted` no matter what happened inside:
//! an unknown slug, a rate-limited client and a storage failure all look
//! identical to the caller, so the endpoint leaks neither which slugs exist
//! nor whether the backend is healthy.

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::api::ip::extract_client_ip;
use crate::config::IpConfig;
use crate::ratelimit::FixedWindowLimiter;
use crate::store::AggregateStore;
use crate::tracking::models::{AccessTier, EventKind, TrackEvent};
use crate::tracking::TrackingEngine;

pub struct TrackState {
    pub store: Arc<dyn AggregateStore>,
    pub engine: Arc<TrackingEngine>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub ip_config: IpConfig,
}

#[derive(Debug, Deserialize)]
pub struct UtmParams {
    pub source: Option<String>,
    pub campaign: Option<String>,
    pub medium: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub slug: String,
    pub event: EventKind,
    pub action: Option<String>,
    pub utm: Option<UtmParams>,
    #[serde(rename = "ref")]
    pub referrer: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Serialize)]
struct TrackResponse {
    status: &'static str,
}

fn accepted() -> impl IntoResponse {
    (StatusCode::ACCEPTED, Json(TrackResponse { status: "accepted" }))
}

pub async fn track(
    State(state): State<Arc<TrackState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<TrackRequest>,
) -> impl IntoResponse {
    let client_ip = extract_client_ip(&headers, addr.ip(), &state.ip_config);
    if !state.limiter.allow(client_ip) {
        return accepted();
    }

    let entity = match state.store.resolve_slug(&req.slug).await {
        Ok(Some(entity)) => entity,
        Ok(None) => return accepted(),
        Err(err) => {
            warn!(error = %err, "slug resolution failed, dropping event");
            return accepted();
        }
    };

    // Demo profiles render synthetic data; nothing real is persisted.
    if entity.tier == AccessTier::Demo {
        return accepted();
    }

    let utm = req.utm.unwrap_or(UtmParams {
        source: None,
        campaign: None,
        medium: None,
    });
    let event = TrackEvent {
        kind: req.event,
        action: req.action,
        utm_source: utm.source,
        utm_campaign: utm.campaign,
        utm_medium: utm.medium,
        referrer: req.referrer,
        device_id: req.device_id,
    };

    state
        .engine
        .record(&entity.entity_id, entity.tier.uniques_enabled(), &event)
        .await;

    accepted()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
