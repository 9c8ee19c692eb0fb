use crate::tracking::models::{AccessTier, DailyAggregate, EntityRecord};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("slug already registered")]
    SlugTaken,
    #[error("stored map column {column} holds malformed JSON")]
    MalformedMap { column: &'static str },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bounded map columns addressable through the capped-bump protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CappedMap {
    ClicksByAction,
    UtmSource,
    UtmCampaign,
    UtmMedium,
    Referrer,
    SocialViewsBySource,
    SocialClicksBySource,
}

impl CappedMap {
    pub const fn column(self) -> &'static str {
        match self {
            CappedMap::ClicksByAction => "clicks_by_action",
            CappedMap::UtmSource => "utm_source_counts",
            CappedMap::UtmCampaign => "utm_campaign_counts",
            CappedMap::UtmMedium => "utm_medium_counts",
            CappedMap::Referrer => "referrer_counts",
            CappedMap::SocialViewsBySource => "social_views_by_source",
            CappedMap::SocialClicksBySource => "social_clicks_by_source",
        }
    }
}

/// Which campaign map an event lands in. The admission budget
/// (`social_campaign_key_count`) is shared across both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignSide {
    Views,
    Clicks,
}

impl CampaignSide {
    pub const fn column(self) -> &'static str {
        match self {
            CampaignSide::Views => "social_campaign_views",
            CampaignSide::Clicks => "social_campaign_clicks",
        }
    }

    pub const fn sibling(self) -> &'static str {
        match self {
            CampaignSide::Views => "social_campaign_clicks",
            CampaignSide::Clicks => "social_campaign_views",
        }
    }
}

/// Persistence for per-(entity, day) aggregate rows.
///
/// Every mutating method is a single conditional statement against the
/// backing database; the precondition travels inside the statement's WHERE
/// clause and "did it match" comes back as the returned bool. Callers chain
/// these primitives into the admission protocols; the store itself never
/// reads a row on the write path.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Initialize the storage (create tables, indexes)
    async fn init(&self) -> Result<()>;

    /// Create the row on first touch and add the scalar deltas. Runs before
    /// any per-dimension update so the row exists for the conditional
    /// statements that follow.
    async fn increment_totals(
        &self,
        entity_id: &str,
        day: &str,
        views_delta: u64,
        clicks_delta: u64,
    ) -> Result<()>;

    /// Bump `key` in a bounded map. The statement matches when the key
    /// already exists or the map still has room for a new non-overflow key
    /// under `cap`. Returns whether it matched; on false the caller routes
    /// the hit to the overflow entry instead.
    async fn increment_map_key(
        &self,
        entity_id: &str,
        day: &str,
        map: CappedMap,
        key: &str,
        cap: u32,
    ) -> Result<bool>;

    /// Bump the reserved overflow entry of a bounded map.
    async fn increment_map_overflow(&self, entity_id: &str, day: &str, map: CappedMap)
        -> Result<()>;

    /// Campaign fast path: bump `key` only if it already exists in the
    /// target map or its sibling. Returns whether the precondition matched.
    async fn increment_campaign_existing(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        key: &str,
    ) -> Result<bool>;

    /// Campaign admission: bump `key` and the shared key counter in one
    /// statement, guarded by `social_campaign_key_count < budget` and the
    /// key being absent from both maps. Returns whether the key was
    /// admitted.
    async fn admit_campaign_key(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        key: &str,
        budget: u32,
    ) -> Result<bool>;

    /// Campaign overflow: unconditionally bump the reserved per-bucket
    /// overflow key. Never grows the key budget.
    async fn increment_campaign_overflow(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        overflow_key: &str,
    ) -> Result<()>;

    /// If the unique cap flag is already set, null out the visitor count and
    /// mode and drop any leftover hashes. Returns whether the flag was set.
    async fn clear_if_unique_capped(&self, entity_id: &str, day: &str) -> Result<bool>;

    /// If the hash set has reached `cap`, set the cap flag, drop the set and
    /// null out the visitor count and mode. Returns whether the cap fired.
    async fn cap_unique_if_full(&self, entity_id: &str, day: &str, cap: u32) -> Result<bool>;

    /// Insert a device hash if it is absent, the cap flag is unset and the
    /// set is under `cap`; the same statement increments the visitor count
    /// and stamps the mode. Returns whether a new member was inserted.
    async fn insert_unique_hash(
        &self,
        entity_id: &str,
        day: &str,
        hash: &str,
        cap: u32,
    ) -> Result<bool>;

    /// Fetch the rows for `entity_id` with `from_day <= day <= to_day`,
    /// oldest first. Days with no row are simply absent. The stored hash set
    /// never leaves the database.
    async fn read_range(
        &self,
        entity_id: &str,
        from_day: &str,
        to_day: &str,
    ) -> StoreResult<Vec<DailyAggregate>>;

    /// Fetch a single row, if present.
    async fn get_day(&self, entity_id: &str, day: &str) -> StoreResult<Option<DailyAggregate>>;

    /// Register an entity under a public slug.
    async fn register_entity(
        &self,
        slug: &str,
        entity_id: &str,
        tier: AccessTier,
    ) -> StoreResult<EntityRecord>;

    /// Resolve a public slug to its entity record. Hot path for ingestion.
    async fn resolve_slug(&self, slug: &str) -> Result<Option<EntityRecord>>;

    /// Look up an entity by its internal id. Used by the read path for tier
    /// gating.
    async fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>>;

    /// Change an entity's access tier. Returns false when the slug is
    /// unknown.
    async fn set_tier(&self, slug: &str, tier: AccessTier) -> Result<bool>;

    /// List registered entities, newest first.
    async fn list_entities(&self, limit: i64, offset: i64) -> Result<Vec<EntityRecord>>;
}
