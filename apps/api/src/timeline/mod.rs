// Movement timeline: raw location events -> time-bucketed playback frames.
// `aggregator` and `summary` are pure; caching, the upstream query and row
// mapping live around them and never leak into the core.

pub mod adapter;
pub mod aggregator;
pub mod cache;
pub mod handlers;
pub mod models;
pub mod summary;
pub mod window;
