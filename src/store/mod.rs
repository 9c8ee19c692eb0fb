pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStore;
pub use postgres::PostgresAggregateStore;
pub use sqlite::SqliteAggregateStore;
pub use trait_def::{AggregateStore, CampaignSide, CappedMap, StoreError, StoreResult};
