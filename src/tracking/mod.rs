//! Bounded analytics aggregation engine
//!
//! Turns untrusted view/click events into per-(entity, day) aggregate rows
//! whose storage stays bounded regardless of inbound cardinality: open
//! dimensions go through capped maps with a reserved overflow key, campaign
//! attribution spends a shared key budget, and unique visitors are counted
//! approximately up to a hash cap.

pub mod classify;
pub mod counts;
pub mod device;
pub mod engine;
pub mod keys;
pub mod models;
pub mod reports;

pub use classify::{classify, SourceBucket};
pub use counts::BoundedCounts;
pub use engine::{TrackingCaps, TrackingEngine};
pub use models::{AccessTier, DailyAggregate, EntityRecord, EventKind, TrackEvent};
