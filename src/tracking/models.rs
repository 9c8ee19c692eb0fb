//! Data models for event tracking and daily aggregates

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::tracking::counts::BoundedCounts;

/// Kind of inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    View,
    Click,
}

/// How a daily unique-visitor figure was produced. Stored as TEXT; absent
/// whenever uniqueness tracking never ran or gave up for the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueMode {
    ApproxDevice,
}

impl UniqueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueMode::ApproxDevice => "approx_device",
        }
    }

    pub fn from_str(raw: &str) -> Option<UniqueMode> {
        match raw {
            "approx_device" => Some(UniqueMode::ApproxDevice),
            _ => None,
        }
    }
}

/// Access tier controlling what a caller may read for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    None,
    Basic,
    Premium,
    Demo,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::None => "none",
            AccessTier::Basic => "basic",
            AccessTier::Premium => "premium",
            AccessTier::Demo => "demo",
        }
    }

    /// Unknown tier text resolves to `None` so a bad row denies access
    /// instead of granting it.
    pub fn from_str(raw: &str) -> Option<AccessTier> {
        match raw {
            "none" => Some(AccessTier::None),
            "basic" => Some(AccessTier::Basic),
            "premium" => Some(AccessTier::Premium),
            "demo" => Some(AccessTier::Demo),
            _ => None,
        }
    }

    /// Approximate unique-visitor tracking only runs for premium entities.
    pub fn uniques_enabled(&self) -> bool {
        matches!(self, AccessTier::Premium)
    }
}

/// A registered entity: public slug, stable internal id, access tier.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub slug: String,
    pub entity_id: String,
    pub tier: AccessTier,
    pub created_at: i64,
}

/// A single inbound tracking event after boundary parsing.
///
/// Fields are carried raw; normalization and classification happen inside
/// the engine so that every write path applies one policy.
#[derive(Debug, Clone)]
pub struct TrackEvent {
    pub kind: EventKind,
    pub action: Option<String>,
    pub utm_source: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_medium: Option<String>,
    pub referrer: Option<String>,
    pub device_id: Option<String>,
}

impl Default for TrackEvent {
    fn default() -> Self {
        Self {
            kind: EventKind::View,
            action: None,
            utm_source: None,
            utm_campaign: None,
            utm_medium: None,
            referrer: None,
            device_id: None,
        }
    }
}

/// The per-(entity, day) aggregate record.
///
/// One row per pair, created on the first event that touches it. Every
/// counter is monotonically non-decreasing for the row's lifetime;
/// `unique_visitors` is `None` whenever the hash cap was reached or
/// uniqueness tracking never ran for the day.
#[derive(Debug, Clone, Default)]
pub struct DailyAggregate {
    pub entity_id: String,
    pub day: String,
    pub views: u64,
    pub clicks_total: u64,
    pub clicks_by_action: BoundedCounts,
    pub utm_source_counts: BoundedCounts,
    pub utm_campaign_counts: BoundedCounts,
    pub utm_medium_counts: BoundedCounts,
    pub referrer_counts: BoundedCounts,
    pub social_views_by_source: BoundedCounts,
    pub social_clicks_by_source: BoundedCounts,
    pub social_campaign_views: BoundedCounts,
    pub social_campaign_clicks: BoundedCounts,
    pub social_campaign_key_count: u64,
    pub unique_visitors: Option<u64>,
    pub unique_mode: Option<UniqueMode>,
    pub unique_cap_reached: bool,
}

/// Format a UTC date as a day key. Lexicographic order on day keys equals
/// chronological order, which is what makes contiguous range scans work.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Today's day key in UTC.
pub fn today_key() -> String {
    day_key(Utc::now().date_naive())
}

/// Every day key of the window ending at `end` (inclusive), oldest first.
pub fn day_range(end: NaiveDate, range_days: u32) -> Vec<String> {
    (0..range_days)
        .rev()
        .map(|offset| day_key(end - Duration::days(i64::from(offset))))
        .collect()
}

/// First and last day key of the window ending at `end` (inclusive).
pub fn window_bounds(end: NaiveDate, range_days: u32) -> (String, String) {
    let first = end - Duration::days(i64::from(range_days.saturating_sub(1)));
    (day_key(first), day_key(end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_key_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(day_key(date), "2024-03-07");
    }

    #[test]
    fn test_day_range_is_oldest_first_and_inclusive() {
        let end = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let range = day_range(end, 3);
        assert_eq!(range, vec!["2024-03-05", "2024-03-06", "2024-03-07"]);
    }

    #[test]
    fn test_window_bounds_cross_month() {
        let end = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let (from, to) = window_bounds(end, 7);
        assert_eq!(from, "2024-02-25");
        assert_eq!(to, "2024-03-02");
    }

    #[test]
    fn test_unique_mode_round_trip() {
        let mode = UniqueMode::ApproxDevice;
        assert_eq!(UniqueMode::from_str(mode.as_str()), Some(mode));
        assert_eq!(UniqueMode::from_str("exact"), None);
    }
}
