//! Batch reply pipeline: fetch items through rotating credentials, generate
//! candidate replies, hold them in a review queue and publish on approval.

pub mod actions;
pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod journal;
pub mod limiter;
pub mod model;
pub mod pipeline;
pub mod quota;
pub mod reconcile;
pub mod rotator;

pub use api::{build_router, AppState};
