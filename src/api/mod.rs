pub mod ip;
pub mod routes;
pub mod stats;
pub mod track;

pub use routes::{create_api_router, create_track_router};
pub use stats::StatsState;
pub use track::TrackState;
