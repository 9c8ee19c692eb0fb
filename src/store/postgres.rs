use crate::store::trait_def::{AggregateStore, CampaignSide, CappedMap, StoreError, StoreResult};
use crate::tracking::counts::BoundedCounts;
use crate::tracking::models::{AccessTier, DailyAggregate, EntityRecord, UniqueMode};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

pub struct PostgresAggregateStore {
    pool: Arc<PgPool>,
}

impl PostgresAggregateStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn now_secs() -> Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64)
}

fn parse_map(row: &PgRow, column: &'static str) -> StoreResult<BoundedCounts> {
    let raw: serde_json::Value = row
        .try_get(column)
        .map_err(|e| StoreError::Other(e.into()))?;
    BoundedCounts::from_json(&raw.to_string()).map_err(|_| StoreError::MalformedMap { column })
}

fn row_to_aggregate(row: &PgRow) -> StoreResult<DailyAggregate> {
    let unique_visitors: Option<i64> = row
        .try_get("unique_visitors")
        .map_err(|e| StoreError::Other(e.into()))?;
    let unique_mode: Option<String> = row
        .try_get("unique_mode")
        .map_err(|e| StoreError::Other(e.into()))?;

    Ok(DailyAggregate {
        entity_id: row
            .try_get("entity_id")
            .map_err(|e| StoreError::Other(e.into()))?,
        day: row.try_get("day").map_err(|e| StoreError::Other(e.into()))?,
        views: row
            .try_get::<i64, _>("views")
            .map_err(|e| StoreError::Other(e.into()))? as u64,
        clicks_total: row
            .try_get::<i64, _>("clicks_total")
            .map_err(|e| StoreError::Other(e.into()))? as u64,
        clicks_by_action: parse_map(row, "clicks_by_action")?,
        utm_source_counts: parse_map(row, "utm_source_counts")?,
        utm_campaign_counts: parse_map(row, "utm_campaign_counts")?,
        utm_medium_counts: parse_map(row, "utm_medium_counts")?,
        referrer_counts: parse_map(row, "referrer_counts")?,
        social_views_by_source: parse_map(row, "social_views_by_source")?,
        social_clicks_by_source: parse_map(row, "social_clicks_by_source")?,
        social_campaign_views: parse_map(row, "social_campaign_views")?,
        social_campaign_clicks: parse_map(row, "social_campaign_clicks")?,
        social_campaign_key_count: row
            .try_get::<i64, _>("social_campaign_key_count")
            .map_err(|e| StoreError::Other(e.into()))? as u64,
        unique_visitors: unique_visitors.map(|v| v as u64),
        unique_mode: unique_mode.as_deref().and_then(UniqueMode::from_str),
        unique_cap_reached: row
            .try_get("unique_cap_reached")
            .map_err(|e| StoreError::Other(e.into()))?,
    })
}

fn row_to_entity(row: &PgRow) -> Result<EntityRecord> {
    let tier: String = row.try_get("tier")?;
    Ok(EntityRecord {
        slug: row.try_get("slug")?,
        entity_id: row.try_get("entity_id")?,
        tier: AccessTier::from_str(&tier).unwrap_or(AccessTier::None),
        created_at: row.try_get("created_at")?,
    })
}

const AGGREGATE_COLUMNS: &str = "entity_id, day, views, clicks_total, clicks_by_action, \
     utm_source_counts, utm_campaign_counts, utm_medium_counts, referrer_counts, \
     social_views_by_source, social_clicks_by_source, social_campaign_views, \
     social_campaign_clicks, social_campaign_key_count, unique_visitors, unique_mode, \
     unique_cap_reached";

#[async_trait]
impl AggregateStore for PostgresAggregateStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_stats (
                entity_id TEXT NOT NULL,
                day TEXT NOT NULL,
                views BIGINT NOT NULL DEFAULT 0,
                clicks_total BIGINT NOT NULL DEFAULT 0,
                clicks_by_action JSONB NOT NULL DEFAULT '{}',
                utm_source_counts JSONB NOT NULL DEFAULT '{}',
                utm_campaign_counts JSONB NOT NULL DEFAULT '{}',
                utm_medium_counts JSONB NOT NULL DEFAULT '{}',
                referrer_counts JSONB NOT NULL DEFAULT '{}',
                social_views_by_source JSONB NOT NULL DEFAULT '{}',
                social_clicks_by_source JSONB NOT NULL DEFAULT '{}',
                social_campaign_views JSONB NOT NULL DEFAULT '{}',
                social_campaign_clicks JSONB NOT NULL DEFAULT '{}',
                social_campaign_key_count BIGINT NOT NULL DEFAULT 0,
                unique_visitors BIGINT,
                unique_mode TEXT,
                unique_cap_reached BOOLEAN NOT NULL DEFAULT FALSE,
                unique_hashes JSONB NOT NULL DEFAULT '{}',
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                PRIMARY KEY (entity_id, day)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                slug TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL UNIQUE,
                tier TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_entity_id ON entities(entity_id)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn increment_totals(
        &self,
        entity_id: &str,
        day: &str,
        views_delta: u64,
        clicks_delta: u64,
    ) -> Result<()> {
        let now = now_secs()?;

        sqlx::query(
            r#"
            INSERT INTO daily_stats (entity_id, day, views, clicks_total, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (entity_id, day) DO UPDATE SET
                views = daily_stats.views + EXCLUDED.views,
                clicks_total = daily_stats.clicks_total + EXCLUDED.clicks_total,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(entity_id)
        .bind(day)
        .bind(views_delta as i64)
        .bind(clicks_delta as i64)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn increment_map_key(
        &self,
        entity_id: &str,
        day: &str,
        map: CappedMap,
        key: &str,
        cap: u32,
    ) -> Result<bool> {
        let col = map.column();
        // Same shape as the SQLite statement: one filtered UPDATE, key always
        // bound, precondition in the WHERE clause.
        let sql = format!(
            r#"
            UPDATE daily_stats
            SET {col} = jsonb_set({col}, ARRAY[$3],
                                  to_jsonb(COALESCE(({col}->>$3)::BIGINT, 0) + 1)),
                updated_at = $4
            WHERE entity_id = $1 AND day = $2
              AND (({col}->>$3) IS NOT NULL
                   OR (SELECT COUNT(*) FROM jsonb_object_keys(daily_stats.{col}) AS k
                       WHERE k <> 'other') < $5)
            "#
        );

        let result = sqlx::query(&sql)
            .bind(entity_id)
            .bind(day)
            .bind(key)
            .bind(now_secs()?)
            .bind(cap as i64)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_map_overflow(
        &self,
        entity_id: &str,
        day: &str,
        map: CappedMap,
    ) -> Result<()> {
        let col = map.column();
        let sql = format!(
            r#"
            UPDATE daily_stats
            SET {col} = jsonb_set({col}, '{{other}}',
                                  to_jsonb(COALESCE(({col}->>'other')::BIGINT, 0) + 1)),
                updated_at = $3
            WHERE entity_id = $1 AND day = $2
            "#
        );

        sqlx::query(&sql)
            .bind(entity_id)
            .bind(day)
            .bind(now_secs()?)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn increment_campaign_existing(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        key: &str,
    ) -> Result<bool> {
        let col = side.column();
        let sibling = side.sibling();
        let sql = format!(
            r#"
            UPDATE daily_stats
            SET {col} = jsonb_set({col}, ARRAY[$3],
                                  to_jsonb(COALESCE(({col}->>$3)::BIGINT, 0) + 1)),
                updated_at = $4
            WHERE entity_id = $1 AND day = $2
              AND (({col}->>$3) IS NOT NULL OR ({sibling}->>$3) IS NOT NULL)
            "#
        );

        let result = sqlx::query(&sql)
            .bind(entity_id)
            .bind(day)
            .bind(key)
            .bind(now_secs()?)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn admit_campaign_key(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        key: &str,
        budget: u32,
    ) -> Result<bool> {
        let col = side.column();
        let sibling = side.sibling();
        let sql = format!(
            r#"
            UPDATE daily_stats
            SET {col} = jsonb_set({col}, ARRAY[$3],
                                  to_jsonb(COALESCE(({col}->>$3)::BIGINT, 0) + 1)),
                social_campaign_key_count = social_campaign_key_count + 1,
                updated_at = $4
            WHERE entity_id = $1 AND day = $2
              AND social_campaign_key_count < $5
              AND ({col}->>$3) IS NULL
              AND ({sibling}->>$3) IS NULL
            "#
        );

        let result = sqlx::query(&sql)
            .bind(entity_id)
            .bind(day)
            .bind(key)
            .bind(now_secs()?)
            .bind(budget as i64)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_campaign_overflow(
        &self,
        entity_id: &str,
        day: &str,
        side: CampaignSide,
        overflow_key: &str,
    ) -> Result<()> {
        let col = side.column();
        let sql = format!(
            r#"
            UPDATE daily_stats
            SET {col} = jsonb_set({col}, ARRAY[$3],
                                  to_jsonb(COALESCE(({col}->>$3)::BIGINT, 0) + 1)),
                updated_at = $4
            WHERE entity_id = $1 AND day = $2
            "#
        );

        sqlx::query(&sql)
            .bind(entity_id)
            .bind(day)
            .bind(overflow_key)
            .bind(now_secs()?)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn clear_if_unique_capped(&self, entity_id: &str, day: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE daily_stats
            SET unique_visitors = NULL, unique_mode = NULL, unique_hashes = '{}',
                updated_at = $3
            WHERE entity_id = $1 AND day = $2 AND unique_cap_reached
            "#,
        )
        .bind(entity_id)
        .bind(day)
        .bind(now_secs()?)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cap_unique_if_full(&self, entity_id: &str, day: &str, cap: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE daily_stats
            SET unique_cap_reached = TRUE, unique_visitors = NULL, unique_mode = NULL,
                unique_hashes = '{}', updated_at = $3
            WHERE entity_id = $1 AND day = $2 AND NOT unique_cap_reached
              AND (SELECT COUNT(*) FROM jsonb_object_keys(daily_stats.unique_hashes)) >= $4
            "#,
        )
        .bind(entity_id)
        .bind(day)
        .bind(now_secs()?)
        .bind(cap as i64)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_unique_hash(
        &self,
        entity_id: &str,
        day: &str,
        hash: &str,
        cap: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE daily_stats
            SET unique_hashes = jsonb_set(unique_hashes, ARRAY[$3], to_jsonb(1)),
                unique_visitors = COALESCE(unique_visitors, 0) + 1,
                unique_mode = 'approx_device',
                updated_at = $4
            WHERE entity_id = $1 AND day = $2
              AND NOT unique_cap_reached
              AND (unique_hashes->>$3) IS NULL
              AND (SELECT COUNT(*) FROM jsonb_object_keys(daily_stats.unique_hashes)) < $5
            "#,
        )
        .bind(entity_id)
        .bind(day)
        .bind(hash)
        .bind(now_secs()?)
        .bind(cap as i64)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn read_range(
        &self,
        entity_id: &str,
        from_day: &str,
        to_day: &str,
    ) -> StoreResult<Vec<DailyAggregate>> {
        let sql = format!(
            r#"
            SELECT {AGGREGATE_COLUMNS}
            FROM daily_stats
            WHERE entity_id = $1 AND day >= $2 AND day <= $3
            ORDER BY day ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(entity_id)
            .bind(from_day)
            .bind(to_day)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Other(e.into()))?;

        rows.iter().map(row_to_aggregate).collect()
    }

    async fn get_day(&self, entity_id: &str, day: &str) -> StoreResult<Option<DailyAggregate>> {
        let sql = format!(
            r#"
            SELECT {AGGREGATE_COLUMNS}
            FROM daily_stats
            WHERE entity_id = $1 AND day = $2
            "#
        );

        let row = sqlx::query(&sql)
            .bind(entity_id)
            .bind(day)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Other(e.into()))?;

        row.as_ref().map(row_to_aggregate).transpose()
    }

    async fn register_entity(
        &self,
        slug: &str,
        entity_id: &str,
        tier: AccessTier,
    ) -> StoreResult<EntityRecord> {
        let created_at = now_secs().map_err(StoreError::Other)?;

        let result = sqlx::query(
            r#"
            INSERT INTO entities (slug, entity_id, tier, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(slug)
        .bind(entity_id)
        .bind(tier.as_str())
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SlugTaken);
        }

        Ok(EntityRecord {
            slug: slug.to_string(),
            entity_id: entity_id.to_string(),
            tier,
            created_at,
        })
    }

    async fn resolve_slug(&self, slug: &str) -> Result<Option<EntityRecord>> {
        let row = sqlx::query(
            r#"
            SELECT slug, entity_id, tier, created_at
            FROM entities
            WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(row_to_entity).transpose()
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>> {
        let row = sqlx::query(
            r#"
            SELECT slug, entity_id, tier, created_at
            FROM entities
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(row_to_entity).transpose()
    }

    async fn set_tier(&self, slug: &str, tier: AccessTier) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET tier = $1
            WHERE slug = $2
            "#,
        )
        .bind(tier.as_str())
        .bind(slug)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_entities(&self, limit: i64, offset: i64) -> Result<Vec<EntityRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT slug, entity_id, tier, created_at
            FROM entities
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(row_to_entity).collect()
    }
}
