//! Write-side tracking engine
//!
//! Applies one inbound event to the daily aggregate row through the store's
//! conditional-update primitives. The engine holds no locks and keeps no
//! state between calls; every cap decision is delegated to a single filtered
//! UPDATE so concurrent workers coordinate only through the database.
//!
//! The whole path is fire-and-forget: a failed dimension is logged and
//! dropped, the other dimensions of the same event still apply, and nothing
//! here ever surfaces an error to the HTTP caller.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::store::{AggregateStore, CampaignSide, CappedMap};
use crate::tracking::classify::{classify, referrer_host, SourceBucket};
use crate::tracking::device::device_hash;
use crate::tracking::keys::{encode_campaign_key, overflow_campaign_key, sanitize_key};
use crate::tracking::models::{today_key, EventKind, TrackEvent};

/// Cap configuration for the bounded structures of a daily row.
#[derive(Debug, Clone, Copy)]
pub struct TrackingCaps {
    /// Max non-overflow keys per bounded map (`K`).
    pub map_keys: u32,
    /// Shared campaign-key budget across both attribution maps (`C`).
    pub campaign_keys: u32,
    /// Max stored device hashes per day (`H`).
    pub unique_hashes: u32,
}

impl Default for TrackingCaps {
    fn default() -> Self {
        Self {
            map_keys: 25,
            campaign_keys: 25,
            unique_hashes: 2500,
        }
    }
}

pub struct TrackingEngine {
    store: Arc<dyn AggregateStore>,
    caps: TrackingCaps,
}

impl TrackingEngine {
    pub fn new(store: Arc<dyn AggregateStore>, caps: TrackingCaps) -> Self {
        Self { store, caps }
    }

    /// Apply one event to today's row for `entity_id`.
    pub async fn record(&self, entity_id: &str, uniques_enabled: bool, event: &TrackEvent) {
        let day = today_key();
        self.record_on(entity_id, &day, uniques_enabled, event).await;
    }

    /// Apply one event to an explicit day. The day is a parameter so tests
    /// control it; production traffic always lands on today's UTC day.
    pub async fn record_on(
        &self,
        entity_id: &str,
        day: &str,
        uniques_enabled: bool,
        event: &TrackEvent,
    ) {
        let (views_delta, clicks_delta) = match event.kind {
            EventKind::View => (1, 0),
            EventKind::Click => (0, 1),
        };

        // Upsert-on-first-touch. If this fails the row may not exist and
        // every conditional update below would no-op, so stop here.
        if let Err(err) = self
            .store
            .increment_totals(entity_id, day, views_delta, clicks_delta)
            .await
        {
            warn!(entity_id, day, error = %err, "failed to increment totals, dropping event");
            return;
        }

        let bucket = classify(
            event.utm_source.as_deref(),
            event.utm_medium.as_deref(),
            event.referrer.as_deref(),
        );

        // The per-bucket maps are keyed by a closed enumeration, so their
        // cap can never bind; passing the enum size keeps them on the same
        // code path as the open maps.
        let bucket_map = match event.kind {
            EventKind::View => CappedMap::SocialViewsBySource,
            EventKind::Click => CappedMap::SocialClicksBySource,
        };
        self.bump_map(
            entity_id,
            day,
            bucket_map,
            bucket.as_str(),
            SourceBucket::ALL.len() as u32,
        )
        .await;

        if let Some(source) = event.utm_source.as_deref() {
            self.bump_map(entity_id, day, CappedMap::UtmSource, source, self.caps.map_keys)
                .await;
        }
        if let Some(medium) = event.utm_medium.as_deref() {
            self.bump_map(entity_id, day, CappedMap::UtmMedium, medium, self.caps.map_keys)
                .await;
        }
        if let Some(campaign) = event.utm_campaign.as_deref() {
            self.bump_map(
                entity_id,
                day,
                CappedMap::UtmCampaign,
                campaign,
                self.caps.map_keys,
            )
            .await;

            let side = match event.kind {
                EventKind::View => CampaignSide::Views,
                EventKind::Click => CampaignSide::Clicks,
            };
            self.attribute_campaign(entity_id, day, side, bucket, campaign)
                .await;
        }
        if let Some(referrer) = event.referrer.as_deref() {
            if let Some(host) = referrer_host(referrer) {
                self.bump_map(entity_id, day, CappedMap::Referrer, &host, self.caps.map_keys)
                    .await;
            }
        }
        if event.kind == EventKind::Click {
            if let Some(action) = event.action.as_deref() {
                self.bump_map(
                    entity_id,
                    day,
                    CappedMap::ClicksByAction,
                    action,
                    self.caps.map_keys,
                )
                .await;
            }
        }

        // Uniqueness only tracks views: a click implies a prior view from
        // the same device, so observing it again would just re-test the hash.
        if uniques_enabled && event.kind == EventKind::View {
            if let Some(device_id) = event.device_id.as_deref() {
                if let Err(err) = self.observe_device(entity_id, day, device_id).await {
                    warn!(entity_id, day, error = %err, "failed to observe device for uniques");
                }
            }
        }
    }

    /// Bump a key in a bounded map, routing to the overflow entry when the
    /// map is full. Failures drop this dimension only.
    async fn bump_map(&self, entity_id: &str, day: &str, map: CappedMap, raw_key: &str, cap: u32) {
        let Some(key) = sanitize_key(raw_key) else {
            return;
        };

        match self
            .store
            .increment_map_key(entity_id, day, map, &key, cap)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                if let Err(err) = self.store.increment_map_overflow(entity_id, day, map).await {
                    warn!(entity_id, day, map = map.column(), error = %err,
                        "failed to increment map overflow");
                }
            }
            Err(err) => {
                warn!(entity_id, day, map = map.column(), error = %err,
                    "failed to increment map key");
            }
        }
    }

    /// Three-phase campaign admission.
    ///
    /// Phase 1 lands on a key already known to either map. Phase 2 admits a
    /// new key while spending one unit of the shared budget, exclusively. A
    /// writer that loses phase 2 retries phase 1 once, because the racing
    /// winner has just created the key and the event must land on it. Only
    /// then does the event fall through to the per-bucket overflow key, so
    /// no event is ever dropped and the budget is never overspent.
    async fn attribute_campaign(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        bucket: SourceBucket,
        campaign_raw: &str,
    ) {
        let Some(key) = encode_campaign_key(bucket, campaign_raw) else {
            return;
        };

        if let Err(err) = self
            .run_campaign_phases(entity_id, day, side, bucket, &key)
            .await
        {
            warn!(entity_id, day, key, error = %err, "failed to attribute campaign");
        }
    }

    async fn run_campaign_phases(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        bucket: SourceBucket,
        key: &str,
    ) -> Result<()> {
        if self
            .store
            .increment_campaign_existing(entity_id, day, side, key)
            .await?
        {
            return Ok(());
        }

        if self
            .store
            .admit_campaign_key(entity_id, day, side, key, self.caps.campaign_keys)
            .await?
        {
            return Ok(());
        }

        // Lost the admission race or the budget is spent. Retry the fast
        // path once before overflowing.
        if self
            .store
            .increment_campaign_existing(entity_id, day, side, key)
            .await?
        {
            return Ok(());
        }

        self.store
            .increment_campaign_overflow(entity_id, day, side, &overflow_campaign_key(bucket))
            .await
    }

    /// Capped approximate unique-device counting.
    ///
    /// Each step is one conditional update; the first that matches ends the
    /// protocol. Once the cap is reached the row reports no number at all
    /// rather than a stale partial count.
    async fn observe_device(&self, entity_id: &str, day: &str, device_id: &str) -> Result<()> {
        let hash = device_hash(entity_id, day, device_id)?;

        if self.store.clear_if_unique_capped(entity_id, day).await? {
            return Ok(());
        }

        if self
            .store
            .cap_unique_if_full(entity_id, day, self.caps.unique_hashes)
            .await?
        {
            return Ok(());
        }

        // No-op when the hash is already a member, or when a racing writer
        // filled the set between the check above and this statement.
        self.store
            .insert_unique_hash(entity_id, day, &hash, self.caps.unique_hashes)
            .await?;

        Ok(())
    }
}
