//! Cached account view and its refresh coordination.
//!
//! The cached balance and digital twin summary are owned by `SyncOrchestrator`. Everything
//! that can make the cache stale (a confirmed transaction, a broker event, the initial mount)
//! asks the orchestrator for a refresh, and the orchestrator guarantees at most one in-flight
//! read pair plus at most one queued follow-up, no matter how many triggers arrive.
//!
//! - `orchestrator`: the coalescing refresh state machine.
//! - `reader`: the trait seam the orchestrator reads server state through.
//! - `state`: the immutable snapshot readers observe, plus refresh reasons and outcomes.

/// Coalescing refresh state machine
pub mod orchestrator;
/// Read-side seam used by the orchestrator
pub mod reader;
/// Snapshot and refresh bookkeeping types
pub mod state;

pub use orchestrator::SyncOrchestrator;
pub use reader::AccountReader;
pub use state::{CacheSnapshot, RefreshOutcome, RefreshReason};
