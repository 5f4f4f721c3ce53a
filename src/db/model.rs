//! Database-side types that have no meaning outside the repositories.

/// Per-day counters bumped by the pipeline. Publishes are counted only by
/// `record_publish`, inside the same transaction that writes history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatCounter {
    Fetched,
    Generated,
}

impl StatCounter {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            StatCounter::Fetched => "fetched_count",
            StatCounter::Generated => "generated_count",
        }
    }
}
