use crate::api::TwinSummary;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

/// Immutable view of the cached account state.
///
/// A new snapshot replaces the previous one as a whole, so balance and summary always come
/// from the same refresh cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub balance: Option<Decimal>,
    pub summary: Option<TwinSummary>,
    /// When balance and summary were last read successfully.
    pub last_refresh_at: Option<DateTime<Utc>>,
    /// Set when the most recent cycle failed and the values above are from an earlier one.
    pub stale: bool,
    pub last_error: Option<String>,
    /// Number of refresh cycles finished, successful or not.
    pub completed_cycles: u64,
}

impl CacheSnapshot {
    /// Whether any cycle has succeeded yet.
    pub fn is_loaded(&self) -> bool {
        self.last_refresh_at.is_some()
    }
}

/// Why a refresh was requested. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Startup,
    Transaction,
    Event,
    Manual,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefreshReason::Startup => "startup",
            RefreshReason::Transaction => "transaction",
            RefreshReason::Event => "event",
            RefreshReason::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// How a `refresh` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The caller started the cycle (and any follow-ups queued during it).
    Completed,
    /// A cycle was already running; the caller waited for the queued follow-up.
    Coalesced,
}
