//! Reporting handlers
//!
//! Range-bounded folds over the daily aggregate rows, gated by the entity's
//! access tier. Tier ineligibility is the only error this subsystem ever
//! surfaces to a caller; storage failures on the read path answer 500
//! without detail.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::store::AggregateStore;
use crate::tracking::models::{day_range, window_bounds, AccessTier, DailyAggregate};
use crate::tracking::reports;

pub struct StatsState {
    pub store: Arc<dyn AggregateStore>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub range_days: Option<u32>,
}

fn parse_range(query: &RangeQuery) -> Option<u32> {
    match query.range_days.unwrap_or(7) {
        range @ (7 | 30) => Some(range),
        _ => None,
    }
}

fn bad_range() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "range_days must be 7 or 30"})),
    )
        .into_response()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "analytics not available for this profile"})),
    )
        .into_response()
}

fn internal() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to retrieve analytics",
    )
        .into_response()
}

async fn tier_of(state: &StatsState, entity_id: &str) -> Result<AccessTier, Response> {
    match state.store.get_entity(entity_id).await {
        Ok(Some(entity)) => Ok(entity.tier),
        Ok(None) => Err(forbidden()),
        Err(err) => {
            tracing::error!(entity_id, error = %err, "failed to resolve entity tier");
            Err(internal())
        }
    }
}

async fn fetch_window(
    state: &StatsState,
    entity_id: &str,
    end: NaiveDate,
    range_days: u32,
) -> Result<Vec<DailyAggregate>, Response> {
    let (from, to) = window_bounds(end, range_days);
    state
        .store
        .read_range(entity_id, &from, &to)
        .await
        .map_err(|err| {
            tracing::error!(entity_id, error = %err, "failed to read aggregate range");
            internal()
        })
}

/// Rows for the breakdown routes: demo entities get synthetic rows, premium
/// entities get the stored window, everyone else is refused.
async fn gated_records(
    state: &StatsState,
    entity_id: &str,
    range_days: u32,
) -> Result<Vec<DailyAggregate>, Response> {
    match tier_of(state, entity_id).await? {
        AccessTier::Premium => {
            let end = Utc::now().date_naive();
            fetch_window(state, entity_id, end, range_days).await
        }
        AccessTier::Demo => {
            let keys = day_range(Utc::now().date_naive(), range_days);
            Ok(reports::demo_records(entity_id, &keys))
        }
        AccessTier::None | AccessTier::Basic => Err(forbidden()),
    }
}

pub async fn summary(
    State(state): State<Arc<StatsState>>,
    Path(entity_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let Some(range_days) = parse_range(&query) else {
        return bad_range();
    };
    let tier = match tier_of(&state, &entity_id).await {
        Ok(tier) => tier,
        Err(response) => return response,
    };
    let today = Utc::now().date_naive();

    match tier {
        AccessTier::None => forbidden(),
        AccessTier::Basic => {
            // Basic sees views only, clamped to the 7-day window.
            let range_days = 7;
            let keys = day_range(today, range_days);
            match fetch_window(&state, &entity_id, today, range_days).await {
                Ok(records) => {
                    Json(reports::basic_summary(&records, &keys, range_days)).into_response()
                }
                Err(response) => response,
            }
        }
        AccessTier::Premium => {
            let keys = day_range(today, range_days);
            let records = match fetch_window(&state, &entity_id, today, range_days).await {
                Ok(records) => records,
                Err(response) => return response,
            };
            let previous_end = today - Duration::days(i64::from(range_days));
            let previous =
                match fetch_window(&state, &entity_id, previous_end, range_days).await {
                    Ok(records) => records,
                    Err(response) => return response,
                };

            let mut report = reports::summary(&records, &keys, range_days);
            report.comparison = Some(reports::compare(&report.totals, &previous));
            Json(report).into_response()
        }
        AccessTier::Demo => {
            let keys = day_range(today, range_days);
            let records = reports::demo_records(&entity_id, &keys);
            let previous_keys =
                day_range(today - Duration::days(i64::from(range_days)), range_days);
            let previous = reports::demo_records(&entity_id, &previous_keys);

            let mut report = reports::summary(&records, &keys, range_days);
            report.comparison = Some(reports::compare(&report.totals, &previous));
            Json(report).into_response()
        }
    }
}

pub async fn actions(
    State(state): State<Arc<StatsState>>,
    Path(entity_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let Some(range_days) = parse_range(&query) else {
        return bad_range();
    };
    match gated_records(&state, &entity_id, range_days).await {
        Ok(records) => Json(reports::actions(&records, range_days)).into_response(),
        Err(response) => response,
    }
}

pub async fn sources(
    State(state): State<Arc<StatsState>>,
    Path(entity_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let Some(range_days) = parse_range(&query) else {
        return bad_range();
    };
    match gated_records(&state, &entity_id, range_days).await {
        Ok(records) => Json(reports::sources(&records, range_days)).into_response(),
        Err(response) => response,
    }
}

pub async fn campaigns(
    State(state): State<Arc<StatsState>>,
    Path(entity_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let Some(range_days) = parse_range(&query) else {
        return bad_range();
    };
    match gated_records(&state, &entity_id, range_days).await {
        Ok(records) => Json(reports::campaigns(&records, range_days)).into_response(),
        Err(response) => response,
    }
}
