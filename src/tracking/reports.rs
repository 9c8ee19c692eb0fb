//! Read-side rollups
//!
//! Pure folds over day-keyed aggregate rows into the report payloads the
//! stats API serves. Nothing here touches the store or holds state; the
//! handlers fetch a day range and hand the rows over.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::tracking::classify::SourceBucket;
use crate::tracking::counts::BoundedCounts;
use crate::tracking::keys::{decode_campaign_key, encode_campaign_key, OVERFLOW_CAMPAIGN};
use crate::tracking::models::{DailyAggregate, UniqueMode};

/// Rows per top-N table.
pub const TOP_N: usize = 25;

#[derive(Debug, Serialize)]
pub struct DaySummary {
    pub day: String,
    pub views: u64,
    pub clicks: u64,
    pub unique_visitors: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SummaryTotals {
    pub views: u64,
    pub clicks: u64,
    pub unique_visitors: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct Comparison {
    pub previous_views: u64,
    pub previous_clicks: u64,
    pub views_change_pct: Option<f64>,
    pub clicks_change_pct: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SummaryReport {
    pub range_days: u32,
    pub days: Vec<DaySummary>,
    pub totals: SummaryTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

/// Views-only series for the basic tier.
#[derive(Debug, Serialize)]
pub struct BasicDaySummary {
    pub day: String,
    pub views: u64,
}

#[derive(Debug, Serialize)]
pub struct BasicSummaryReport {
    pub range_days: u32,
    pub days: Vec<BasicDaySummary>,
    pub total_views: u64,
}

#[derive(Debug, Serialize)]
pub struct CountRow {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct Breakdown {
    pub rows: Vec<CountRow>,
    pub other: u64,
}

#[derive(Debug, Serialize)]
pub struct ActionsReport {
    pub range_days: u32,
    pub actions: Vec<CountRow>,
    pub other: u64,
    pub total_clicks: u64,
}

#[derive(Debug, Serialize)]
pub struct BucketRow {
    pub source: String,
    pub views: u64,
    pub clicks: u64,
}

#[derive(Debug, Serialize)]
pub struct SourcesReport {
    pub range_days: u32,
    pub buckets: Vec<BucketRow>,
    pub utm_sources: Breakdown,
    pub utm_mediums: Breakdown,
    pub referrers: Breakdown,
}

#[derive(Debug, Serialize)]
pub struct CampaignRow {
    pub source: String,
    pub campaign: String,
    pub views: u64,
    pub clicks: u64,
}

#[derive(Debug, Serialize)]
pub struct CampaignsReport {
    pub range_days: u32,
    pub campaigns: Vec<CampaignRow>,
    /// Per-bucket counts absorbed after the shared key budget was spent.
    pub overflow: Vec<BucketRow>,
}

fn merged<F>(records: &[DailyAggregate], pick: F) -> BoundedCounts
where
    F: Fn(&DailyAggregate) -> &BoundedCounts,
{
    let mut merged = BoundedCounts::new();
    for record in records {
        merged.merge(pick(record));
    }
    merged
}

fn breakdown(counts: &BoundedCounts) -> Breakdown {
    Breakdown {
        rows: counts
            .top(TOP_N)
            .into_iter()
            .map(|(key, count)| CountRow { key, count })
            .collect(),
        other: counts.other(),
    }
}

/// Full per-day series plus totals. Days with no row report zeros; the
/// unique total sums the days that still claim a number and is `None` when
/// no day does.
pub fn summary(records: &[DailyAggregate], day_keys: &[String], range_days: u32) -> SummaryReport {
    let by_day: BTreeMap<&str, &DailyAggregate> =
        records.iter().map(|r| (r.day.as_str(), r)).collect();

    let days: Vec<DaySummary> = day_keys
        .iter()
        .map(|day| match by_day.get(day.as_str()) {
            Some(r) => DaySummary {
                day: day.clone(),
                views: r.views,
                clicks: r.clicks_total,
                unique_visitors: r.unique_visitors,
            },
            None => DaySummary {
                day: day.clone(),
                views: 0,
                clicks: 0,
                unique_visitors: None,
            },
        })
        .collect();

    let views = days.iter().map(|d| d.views).sum();
    let clicks = days.iter().map(|d| d.clicks).sum();
    let unique_visitors = if days.iter().any(|d| d.unique_visitors.is_some()) {
        Some(days.iter().filter_map(|d| d.unique_visitors).sum())
    } else {
        None
    };

    SummaryReport {
        range_days,
        days,
        totals: SummaryTotals {
            views,
            clicks,
            unique_visitors,
        },
        comparison: None,
    }
}

/// Views-only series for the basic tier.
pub fn basic_summary(
    records: &[DailyAggregate],
    day_keys: &[String],
    range_days: u32,
) -> BasicSummaryReport {
    let by_day: BTreeMap<&str, u64> = records.iter().map(|r| (r.day.as_str(), r.views)).collect();

    let days: Vec<BasicDaySummary> = day_keys
        .iter()
        .map(|day| BasicDaySummary {
            day: day.clone(),
            views: by_day.get(day.as_str()).copied().unwrap_or(0),
        })
        .collect();

    let total_views = days.iter().map(|d| d.views).sum();

    BasicSummaryReport {
        range_days,
        days,
        total_views,
    }
}

/// Period-over-period comparison against the adjacent previous window.
/// Percent change is undefined over a zero baseline and reported as `None`.
pub fn compare(totals: &SummaryTotals, previous: &[DailyAggregate]) -> Comparison {
    let previous_views: u64 = previous.iter().map(|r| r.views).sum();
    let previous_clicks: u64 = previous.iter().map(|r| r.clicks_total).sum();

    let pct = |current: u64, prev: u64| -> Option<f64> {
        if prev == 0 {
            None
        } else {
            Some((current as f64 - prev as f64) / prev as f64 * 100.0)
        }
    };

    Comparison {
        previous_views,
        previous_clicks,
        views_change_pct: pct(totals.views, previous_views),
        clicks_change_pct: pct(totals.clicks, previous_clicks),
    }
}

pub fn actions(records: &[DailyAggregate], range_days: u32) -> ActionsReport {
    let counts = merged(records, |r| &r.clicks_by_action);
    let total_clicks = records.iter().map(|r| r.clicks_total).sum();
    let Breakdown { rows, other } = breakdown(&counts);

    ActionsReport {
        range_days,
        actions: rows,
        other,
        total_clicks,
    }
}

pub fn sources(records: &[DailyAggregate], range_days: u32) -> SourcesReport {
    let views = merged(records, |r| &r.social_views_by_source);
    let clicks = merged(records, |r| &r.social_clicks_by_source);

    // The bucket table is the closed enumeration in declaration order, zero
    // rows included, so clients get a stable shape.
    let buckets = SourceBucket::ALL
        .iter()
        .map(|bucket| BucketRow {
            source: bucket.as_str().to_string(),
            views: views.get(bucket.as_str()),
            clicks: clicks.get(bucket.as_str()),
        })
        .collect();

    SourcesReport {
        range_days,
        buckets,
        utm_sources: breakdown(&merged(records, |r| &r.utm_source_counts)),
        utm_mediums: breakdown(&merged(records, |r| &r.utm_medium_counts)),
        referrers: breakdown(&merged(records, |r| &r.referrer_counts)),
    }
}

pub fn campaigns(records: &[DailyAggregate], range_days: u32) -> CampaignsReport {
    let views = merged(records, |r| &r.social_campaign_views);
    let clicks = merged(records, |r| &r.social_campaign_clicks);

    let mut combined: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for (key, count) in views.iter() {
        combined.entry(key.to_string()).or_default().0 += count;
    }
    for (key, count) in clicks.iter() {
        combined.entry(key.to_string()).or_default().1 += count;
    }

    let mut rows = Vec::new();
    let mut overflow = Vec::new();
    for (key, (views, clicks)) in combined {
        // Keys that don't decode against the closed bucket set are skipped;
        // the write path never produces them.
        let Some((bucket, campaign)) = decode_campaign_key(&key) else {
            continue;
        };
        if campaign == OVERFLOW_CAMPAIGN {
            overflow.push(BucketRow {
                source: bucket.as_str().to_string(),
                views,
                clicks,
            });
        } else {
            rows.push(CampaignRow {
                source: bucket.as_str().to_string(),
                campaign,
                views,
                clicks,
            });
        }
    }

    rows.sort_by(|a, b| {
        (b.views + b.clicks)
            .cmp(&(a.views + a.clicks))
            .then_with(|| a.campaign.cmp(&b.campaign))
    });
    rows.truncate(TOP_N);

    CampaignsReport {
        range_days,
        campaigns: rows,
        overflow,
    }
}

/// Synthetic rows for the demo tier.
///
/// Seeded from the entity id so repeated requests render identically, and
/// never persisted; demo reads run the same folds as real ones.
pub fn demo_records(entity_id: &str, day_keys: &[String]) -> Vec<DailyAggregate> {
    let mut hasher = DefaultHasher::new();
    entity_id.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());

    const ACTIONS: [&str; 4] = ["follow", "website", "email", "book_call"];
    const CAMPAIGNS: [(SourceBucket, &str); 3] = [
        (SourceBucket::Instagram, "spring_push"),
        (SourceBucket::Facebook, "launch_week"),
        (SourceBucket::Tiktok, "teaser"),
    ];
    const MEDIUMS: [&str; 3] = ["social", "cpc", "email"];
    const REFERRERS: [&str; 3] = ["instagram.com", "l.facebook.com", "t.co"];

    day_keys
        .iter()
        .map(|day| {
            let views = rng.random_range(80..400u64);
            let clicks = rng.random_range(10..views / 2);

            let mut record = DailyAggregate {
                entity_id: entity_id.to_string(),
                day: day.clone(),
                views,
                clicks_total: clicks,
                unique_visitors: Some(views * rng.random_range(55..85u64) / 100),
                unique_mode: Some(UniqueMode::ApproxDevice),
                ..Default::default()
            };

            let mut remaining_clicks = clicks;
            for action in ACTIONS {
                let share = rng.random_range(0..=remaining_clicks);
                record.clicks_by_action.add(action, share);
                remaining_clicks -= share;
            }

            for (i, bucket) in [
                SourceBucket::Instagram,
                SourceBucket::Facebook,
                SourceBucket::Tiktok,
                SourceBucket::Direct,
            ]
            .iter()
            .enumerate()
            {
                let v = views / (2u64 << i);
                let c = clicks / (2u64 << i);
                record.social_views_by_source.add(bucket.as_str(), v);
                record.social_clicks_by_source.add(bucket.as_str(), c);
                record.utm_source_counts.add(bucket.as_str(), v);
            }

            for medium in MEDIUMS {
                record
                    .utm_medium_counts
                    .add(medium, rng.random_range(1..40u64));
            }
            for referrer in REFERRERS {
                record
                    .referrer_counts
                    .add(referrer, rng.random_range(1..60u64));
            }

            for (bucket, campaign) in CAMPAIGNS {
                if let Some(key) = encode_campaign_key(bucket, campaign) {
                    record
                        .social_campaign_views
                        .add(&key, rng.random_range(5..80u64));
                    record
                        .social_campaign_clicks
                        .add(&key, rng.random_range(1..20u64));
                    record.utm_campaign_counts.add(campaign, 1);
                }
            }
            record.social_campaign_key_count = CAMPAIGNS.len() as u64;

            record
        })
        .collect()
}
