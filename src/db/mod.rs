//! Database module: SQLite pool setup and SQL repositories for the review
//! queue, the per-user log journal, daily stats, history and the content cache.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::StatCounter;
