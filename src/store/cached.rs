use crate::store::trait_def::{AggregateStore, CampaignSide, CappedMap, StoreResult};
use crate::tracking::models::{AccessTier, DailyAggregate, EntityRecord};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Store wrapper that caches entity lookups.
///
/// Slug resolution runs once per inbound beacon and tier lookups once per
/// report request, while the entity table changes only through the admin
/// CLI, so both sit behind a TTL cache. Aggregate reads and every counter
/// mutation pass straight through: the write-path protocols rely on the
/// database seeing each conditional update.
pub struct CachedStore {
    inner: Arc<dyn AggregateStore>,
    slug_cache: Cache<String, Option<EntityRecord>>,
    entity_cache: Cache<String, Option<EntityRecord>>,
}

impl CachedStore {
    pub fn new(inner: Arc<dyn AggregateStore>, max_entries: u64, ttl_secs: u64) -> Self {
        let slug_cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        let entity_cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            inner,
            slug_cache,
            entity_cache,
        }
    }
}

#[async_trait]
impl AggregateStore for CachedStore {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn increment_totals(
        &self,
        entity_id: &str,
        day: &str,
        views_delta: u64,
        clicks_delta: u64,
    ) -> Result<()> {
        self.inner
            .increment_totals(entity_id, day, views_delta, clicks_delta)
            .await
    }

    async fn increment_map_key(
        &self,
        entity_id: &str,
        day: &str,
        map: CappedMap,
        key: &str,
        cap: u32,
    ) -> Result<bool> {
        self.inner
            .increment_map_key(entity_id, day, map, key, cap)
            .await
    }

    async fn increment_map_overflow(
        &self,
        entity_id: &str,
        day: &str,
        map: CappedMap,
    ) -> Result<()> {
        self.inner.increment_map_overflow(entity_id, day, map).await
    }

    async fn increment_campaign_existing(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        key: &str,
    ) -> Result<bool> {
        self.inner
            .increment_campaign_existing(entity_id, day, side, key)
            .await
    }

    async fn admit_campaign_key(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        key: &str,
        budget: u32,
    ) -> Result<bool> {
        self.inner
            .admit_campaign_key(entity_id, day, side, key, budget)
            .await
    }

    async fn increment_campaign_overflow(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        overflow_key: &str,
    ) -> Result<()> {
        self.inner
            .increment_campaign_overflow(entity_id, day, side, overflow_key)
            .await
    }

    async fn clear_if_unique_capped(&self, entity_id: &str, day: &str) -> Result<bool> {
        self.inner.clear_if_unique_capped(entity_id, day).await
    }

    async fn cap_unique_if_full(&self, entity_id: &str, day: &str, cap: u32) -> Result<bool> {
        self.inner.cap_unique_if_full(entity_id, day, cap).await
    }

    async fn insert_unique_hash(
        &self,
        entity_id: &str,
        day: &str,
        hash: &str,
        cap: u32,
    ) -> Result<bool> {
        self.inner
            .insert_unique_hash(entity_id, day, hash, cap)
            .await
    }

    async fn read_range(
        &self,
        entity_id: &str,
        from_day: &str,
        to_day: &str,
    ) -> StoreResult<Vec<DailyAggregate>> {
        self.inner.read_range(entity_id, from_day, to_day).await
    }

    async fn get_day(&self, entity_id: &str, day: &str) -> StoreResult<Option<DailyAggregate>> {
        self.inner.get_day(entity_id, day).await
    }

    async fn register_entity(
        &self,
        slug: &str,
        entity_id: &str,
        tier: AccessTier,
    ) -> StoreResult<EntityRecord> {
        let record = self.inner.register_entity(slug, entity_id, tier).await?;

        // A failed earlier lookup may have cached the slug as absent.
        self.slug_cache.invalidate(slug).await;
        self.entity_cache.invalidate(entity_id).await;

        Ok(record)
    }

    async fn resolve_slug(&self, slug: &str) -> Result<Option<EntityRecord>> {
        if let Some(cached) = self.slug_cache.get(slug).await {
            return Ok(cached);
        }

        let record = self.inner.resolve_slug(slug).await?;
        self.slug_cache
            .insert(slug.to_string(), record.clone())
            .await;

        Ok(record)
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>> {
        if let Some(cached) = self.entity_cache.get(entity_id).await {
            return Ok(cached);
        }

        let record = self.inner.get_entity(entity_id).await?;
        self.entity_cache
            .insert(entity_id.to_string(), record.clone())
            .await;

        Ok(record)
    }

    async fn set_tier(&self, slug: &str, tier: AccessTier) -> Result<bool> {
        let updated = self.inner.set_tier(slug, tier).await?;

        if updated {
            self.slug_cache.invalidate(slug).await;
            if let Some(record) = self.inner.resolve_slug(slug).await? {
                self.entity_cache.invalidate(&record.entity_id).await;
            }
        }

        Ok(updated)
    }

    async fn list_entities(&self, limit: i64, offset: i64) -> Result<Vec<EntityRecord>> {
        self.inner.list_entities(limit, offset).await
    }
}
