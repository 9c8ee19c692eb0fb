//! Engine integration tests
//!
//! Sequential properties of the aggregation engine against an in-memory
//! SQLite store: exact totals without contention, bounded-map caps with
//! overflow routing, the shared campaign key budget, and the capped
//! unique-device counter.

use pagepulse::store::{AggregateStore, SqliteAggregateStore};
use pagepulse::tracking::models::{EventKind, TrackEvent};
use pagepulse::tracking::{TrackingCaps, TrackingEngine};
use std::sync::Arc;

const DAY: &str = "2024-03-07";

async fn create_test_store() -> Arc<dyn AggregateStore> {
    // One connection so every statement sees the same in-memory database
    let store = SqliteAggregateStore::new("sqlite::memory:", 1).await.unwrap();
    store.init().await.unwrap();
    Arc::new(store)
}

fn engine(store: &Arc<dyn AggregateStore>, caps: TrackingCaps) -> TrackingEngine {
    TrackingEngine::new(Arc::clone(store), caps)
}

fn view() -> TrackEvent {
    TrackEvent::default()
}

fn click(action: &str) -> TrackEvent {
    TrackEvent {
        kind: EventKind::Click,
        action: Some(action.to_string()),
        ..Default::default()
    }
}

fn view_from(source: &str) -> TrackEvent {
    TrackEvent {
        utm_source: Some(source.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_totals_are_exact_without_contention() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    for _ in 0..7 {
        engine.record_on("ent_1", DAY, false, &view()).await;
    }
    for _ in 0..3 {
        engine.record_on("ent_1", DAY, false, &click("follow")).await;
    }

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.views, 7);
    assert_eq!(record.clicks_total, 3);
    assert_eq!(record.clicks_by_action.get("follow"), 3);
}

#[tokio::test]
async fn test_utm_source_alias_lands_in_facebook_bucket() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    engine.record_on("ent_1", DAY, false, &view_from("fb")).await;

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.social_views_by_source.get("facebook"), 1);
    // The raw (sanitized) utm_source is still counted in its own map
    assert_eq!(record.utm_source_counts.get("fb"), 1);
}

#[tokio::test]
async fn test_bounded_map_routes_overflow_after_cap() {
    let store = create_test_store().await;
    let caps = TrackingCaps {
        map_keys: 2,
        ..Default::default()
    };
    let engine = engine(&store, caps);

    engine.record_on("ent_1", DAY, false, &view_from("x")).await;
    engine.record_on("ent_1", DAY, false, &view_from("y")).await;
    engine.record_on("ent_1", DAY, false, &view_from("z")).await;

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.utm_source_counts.key_count(), 2);
    assert_eq!(record.utm_source_counts.get("x"), 1);
    assert_eq!(record.utm_source_counts.get("y"), 1);
    assert_eq!(record.utm_source_counts.get("z"), 0);
    assert_eq!(record.utm_source_counts.other(), 1);
}

#[tokio::test]
async fn test_existing_key_increments_past_cap() {
    let store = create_test_store().await;
    let caps = TrackingCaps {
        map_keys: 2,
        ..Default::default()
    };
    let engine = engine(&store, caps);

    for source in ["x", "y", "x", "x"] {
        engine.record_on("ent_1", DAY, false, &view_from(source)).await;
    }

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.utm_source_counts.get("x"), 3);
    assert_eq!(record.utm_source_counts.other(), 0);
}

#[tokio::test]
async fn test_unnormalizable_key_drops_dimension_only() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    engine.record_on("ent_1", DAY, false, &view_from("!!!")).await;

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    // The view still counted, the dimension was dropped
    assert_eq!(record.views, 1);
    assert_eq!(record.utm_source_counts.key_count(), 0);
}

#[tokio::test]
async fn test_action_only_counted_for_clicks() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    let view_with_action = TrackEvent {
        action: Some("follow".to_string()),
        ..Default::default()
    };
    engine.record_on("ent_1", DAY, false, &view_with_action).await;
    engine.record_on("ent_1", DAY, false, &click("follow")).await;

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.clicks_by_action.get("follow"), 1);
}

#[tokio::test]
async fn test_referrer_counted_by_hostname() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    let event = TrackEvent {
        referrer: Some("https://blog.example.org/post?x=1".to_string()),
        ..Default::default()
    };
    engine.record_on("ent_1", DAY, false, &event).await;

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.referrer_counts.get("blogexampleorg"), 1);
    assert_eq!(record.social_views_by_source.get("other"), 1);
}

#[tokio::test]
async fn test_campaign_budget_shared_and_overflow() {
    let store = create_test_store().await;
    let caps = TrackingCaps {
        campaign_keys: 2,
        ..Default::default()
    };
    let engine = engine(&store, caps);

    for campaign in ["alpha", "beta", "gamma"] {
        let event = TrackEvent {
            utm_source: Some("fb".to_string()),
            utm_campaign: Some(campaign.to_string()),
            ..Default::default()
        };
        engine.record_on("ent_1", DAY, false, &event).await;
    }

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.social_campaign_key_count, 2);
    assert_eq!(record.social_campaign_views.get("facebook__alpha"), 1);
    assert_eq!(record.social_campaign_views.get("facebook__beta"), 1);
    assert_eq!(record.social_campaign_views.get("facebook__gamma"), 0);
    assert_eq!(record.social_campaign_views.get("facebook__other_campaign"), 1);
}

#[tokio::test]
async fn test_campaign_key_shared_across_views_and_clicks() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    let view_event = TrackEvent {
        utm_source: Some("fb".to_string()),
        utm_campaign: Some("sale".to_string()),
        ..Default::default()
    };
    let click_event = TrackEvent {
        kind: EventKind::Click,
        utm_source: Some("fb".to_string()),
        utm_campaign: Some("sale".to_string()),
        ..Default::default()
    };

    engine.record_on("ent_1", DAY, false, &view_event).await;
    engine.record_on("ent_1", DAY, false, &click_event).await;

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    // The click landed on the sibling map without spending a second budget unit
    assert_eq!(record.social_campaign_views.get("facebook__sale"), 1);
    assert_eq!(record.social_campaign_clicks.get("facebook__sale"), 1);
    assert_eq!(record.social_campaign_key_count, 1);
}

#[tokio::test]
async fn test_unique_counts_distinct_devices_once() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    for device in ["d1", "d2", "d1"] {
        let event = TrackEvent {
            device_id: Some(device.to_string()),
            ..Default::default()
        };
        engine.record_on("ent_1", DAY, true, &event).await;
    }

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.unique_visitors, Some(2));
    assert!(!record.unique_cap_reached);
}

#[tokio::test]
async fn test_unique_cap_clears_count_permanently() {
    let store = create_test_store().await;
    let caps = TrackingCaps {
        unique_hashes: 2,
        ..Default::default()
    };
    let engine = engine(&store, caps);

    let observe = |device: &str| TrackEvent {
        device_id: Some(device.to_string()),
        ..Default::default()
    };

    engine.record_on("ent_1", DAY, true, &observe("d1")).await;
    engine.record_on("ent_1", DAY, true, &observe("d2")).await;
    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.unique_visitors, Some(2));

    // The third distinct device trips the cap: the count is withdrawn
    // rather than reported as a wrong partial number.
    engine.record_on("ent_1", DAY, true, &observe("d3")).await;
    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert!(record.unique_cap_reached);
    assert_eq!(record.unique_visitors, None);
    assert_eq!(record.unique_mode, None);

    // And stays withdrawn for any further observation
    engine.record_on("ent_1", DAY, true, &observe("d4")).await;
    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.unique_visitors, None);
}

#[tokio::test]
async fn test_unique_not_tracked_when_ineligible() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    let event = TrackEvent {
        device_id: Some("d1".to_string()),
        ..Default::default()
    };
    engine.record_on("ent_1", DAY, false, &event).await;

    let record = store.get_day("ent_1", DAY).await.unwrap().unwrap();
    assert_eq!(record.unique_visitors, None);
    assert_eq!(record.unique_mode, None);
}

#[tokio::test]
async fn test_read_range_orders_days_and_skips_gaps() {
    let store = create_test_store().await;
    let engine = engine(&store, TrackingCaps::default());

    engine.record_on("ent_1", "2024-03-05", false, &view()).await;
    engine.record_on("ent_1", "2024-03-07", false, &view()).await;
    engine.record_on("ent_2", "2024-03-06", false, &view()).await;

    let records = store
        .read_range("ent_1", "2024-03-01", "2024-03-07")
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].day, "2024-03-05");
    assert_eq!(records[1].day, "2024-03-07");
}
