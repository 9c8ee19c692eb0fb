pub mod api;
pub mod config;
pub mod ratelimit;
pub mod store;
pub mod tracking;
