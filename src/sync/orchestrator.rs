//! Coalescing refresh orchestrator.
//!
//! `SyncOrchestrator` is a two-state machine (idle, refreshing) guarded by a short
//! `std::sync::Mutex` section that is never held across an `.await`:
//!
//! - `refresh()` while idle starts a cycle: balance and summary are read concurrently and the
//!   snapshot is replaced as a whole.
//! - `refresh()` while refreshing only sets the pending flag and waits for the next cycle.
//! - When a cycle ends with the pending flag set, the flag is cleared and exactly one more cycle
//!   runs, so every trigger that arrived before it began is reflected in its result.
//!
//! Cycles run on a spawned task: dropping the future returned by `refresh()` never leaves the
//! machine stuck in the refreshing state.

use super::reader::AccountReader;
use super::state::{CacheSnapshot, RefreshOutcome, RefreshReason};
use crate::api::AccountApi;
use crate::events::{EventChannel, EventError, EventHandler, EventMessage, SubscriptionId};
use crate::transaction::{TransactionObserver, TransactionRequest, TransactionResult};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Flags {
    in_flight: bool,
    pending: bool,
    /// Reason of the latest trigger folded into the pending cycle.
    pending_reason: Option<RefreshReason>,
    /// Cycles started so far; the running cycle's number while `in_flight`.
    started_cycles: u64,
}

struct Inner {
    reader: Arc<dyn AccountReader>,
    topic: String,
    flags: Mutex<Flags>,
    snapshot: watch::Sender<CacheSnapshot>,
}

/// Owner of the cached balance and summary.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Create an orchestrator reading through `reader`, listening on `topic` once attached.
    pub fn new(reader: Arc<dyn AccountReader>, topic: impl Into<String>) -> Self {
        let (snapshot, _) = watch::channel(CacheSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                reader,
                topic: topic.into(),
                flags: Mutex::new(Flags::default()),
                snapshot,
            }),
        }
    }

    pub fn from_api(api: AccountApi, topic: impl Into<String>) -> Self {
        Self::new(Arc::new(api), topic)
    }

    /// Refresh the cache and wait until it reflects server state at or after this call.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresh_for(RefreshReason::Manual).await
    }

    /// `refresh` with an explicit reason for the logs.
    pub async fn refresh_for(&self, reason: RefreshReason) -> RefreshOutcome {
        let wait_for_cycle = {
            let mut flags = self.inner.flags();
            if flags.in_flight {
                flags.pending = true;
                flags.pending_reason = Some(reason);
                Some(flags.started_cycles + 1)
            } else {
                flags.in_flight = true;
                flags.started_cycles += 1;
                None
            }
        };

        if let Some(target) = wait_for_cycle {
            debug!("Refresh ({}) coalesced into cycle {}", reason, target);
            let mut receiver = self.inner.snapshot.subscribe();
            if receiver
                .wait_for(|s| s.completed_cycles >= target)
                .await
                .is_err()
            {
                warn!("Snapshot channel closed while waiting for cycle {}", target);
            }
            return RefreshOutcome::Coalesced;
        }

        let inner = self.inner.clone();
        if let Err(e) = tokio::spawn(inner.drive(reason)).await {
            error!("Refresh task failed: {}", e);
            self.inner.recover();
        }
        RefreshOutcome::Completed
    }

    /// Fire-and-forget refresh. Must be called inside a Tokio runtime.
    pub fn trigger(&self, reason: RefreshReason) {
        let this = self.clone();
        tokio::spawn(async move {
            this.refresh_for(reason).await;
        });
    }

    /// Initial refresh on mount.
    pub fn start(&self) {
        info!("Starting sync orchestrator");
        self.trigger(RefreshReason::Startup);
    }

    /// Refresh on every broker message matching the configured topic.
    ///
    /// Each call registers another handler, so attach once per channel. Extra handlers only
    /// add triggers, which coalesce into the same queued cycle.
    pub fn attach(&self, channel: &EventChannel) -> Result<SubscriptionId, EventError> {
        let id = channel.subscribe(&self.inner.topic, Arc::new(self.clone()))?;
        info!("Sync orchestrator listening on {}", self.inner.topic);
        Ok(id)
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CacheSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.flags().in_flight
    }
}

impl Inner {
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run cycles until no trigger is pending. The caller has already marked a cycle as started.
    async fn drive(self: Arc<Self>, reason: RefreshReason) {
        let mut reason = reason;
        loop {
            let cycle = self.flags().started_cycles;
            self.run_cycle(cycle, reason).await;

            let mut flags = self.flags();
            if !flags.pending {
                flags.in_flight = false;
                return;
            }
            flags.pending = false;
            flags.started_cycles += 1;
            reason = flags.pending_reason.take().unwrap_or(RefreshReason::Manual);
            debug!("Running queued refresh cycle {}", flags.started_cycles);
        }
    }

    async fn run_cycle(&self, cycle: u64, reason: RefreshReason) {
        debug!("Refresh cycle {} started ({})", cycle, reason);
        let (balance, summary) = tokio::join!(self.reader.balance(), self.reader.summary());

        match (balance, summary) {
            (Ok(balance), Ok(summary)) => {
                info!("Refresh cycle {} ({}) completed, balance {}", cycle, reason, balance);
                let refreshed_at = Utc::now();
                self.snapshot.send_modify(|s| {
                    s.balance = Some(balance);
                    s.summary = Some(summary);
                    s.last_refresh_at = Some(refreshed_at);
                    s.stale = false;
                    s.last_error = None;
                    s.completed_cycles = cycle;
                });
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    "Refresh cycle {} ({}) failed, keeping previous snapshot: {}",
                    cycle, reason, e
                );
                self.snapshot.send_modify(|s| {
                    s.stale = true;
                    s.last_error = Some(e.to_string());
                    s.completed_cycles = cycle;
                });
            }
        }
    }

    /// Release waiters after a cycle task died without finishing.
    fn recover(&self) {
        let started = {
            let mut flags = self.flags();
            flags.in_flight = false;
            flags.pending = false;
            flags.pending_reason = None;
            flags.started_cycles
        };
        self.snapshot.send_modify(|s| {
            s.stale = true;
            s.last_error = Some("refresh aborted".to_string());
            s.completed_cycles = started;
        });
    }
}

#[async_trait::async_trait]
impl EventHandler for SyncOrchestrator {
    async fn handle(&self, message: &EventMessage) {
        debug!("Event on {} invalidates the cache", message.topic);
        self.trigger(RefreshReason::Event);
    }

    fn name(&self) -> &'static str {
        "sync-orchestrator"
    }
}

impl TransactionObserver for SyncOrchestrator {
    fn transaction_completed(&self, request: &TransactionRequest, _result: &TransactionResult) {
        debug!("{} confirmed, refreshing", request);
        self.trigger(RefreshReason::Transaction);
    }

    fn name(&self) -> &'static str {
        "sync-orchestrator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, TwinSummary};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Reader whose balance call blocks until the test hands out a permit.
    struct GatedReader {
        gate: Semaphore,
        balance_calls: AtomicU64,
        summary_calls: AtomicU64,
        fail_summary: AtomicBool,
    }

    impl GatedReader {
        fn new(open: bool) -> Self {
            Self {
                gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
                balance_calls: AtomicU64::new(0),
                summary_calls: AtomicU64::new(0),
                fail_summary: AtomicBool::new(false),
            }
        }

        fn balance_calls(&self) -> u64 {
            self.balance_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl AccountReader for GatedReader {
        async fn balance(&self) -> Result<Decimal, ApiError> {
            let call = self.balance_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.gate.acquire().await.unwrap().forget();
            Ok(Decimal::from(call * 10))
        }

        async fn summary(&self) -> Result<TwinSummary, ApiError> {
            let call = self.summary_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_summary.load(Ordering::SeqCst) {
                return Err(ApiError::ServerError {
                    status: 500,
                    detail: None,
                });
            }
            let mut summary = TwinSummary::new();
            summary.insert("total_events".to_string(), call.into());
            Ok(summary)
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn refresh_replaces_balance_and_summary_together() {
        let reader = Arc::new(GatedReader::new(true));
        let orchestrator = SyncOrchestrator::new(reader.clone(), "banco/+/events");
        assert!(!orchestrator.snapshot().is_loaded());

        assert_eq!(orchestrator.refresh().await, RefreshOutcome::Completed);

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.balance, Some(Decimal::from(10)));
        assert_eq!(snapshot.summary.unwrap()["total_events"], 1);
        assert!(snapshot.last_refresh_at.is_some());
        assert!(!snapshot.stale);
        assert_eq!(snapshot.completed_cycles, 1);
        assert!(!orchestrator.is_refreshing());
    }

    #[tokio::test]
    async fn triggers_during_a_refresh_coalesce_into_one_more_cycle() {
        let reader = Arc::new(GatedReader::new(false));
        let orchestrator = SyncOrchestrator::new(reader.clone(), "banco/+/events");

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.refresh().await }
        });
        wait_until(|| reader.balance_calls() == 1).await;
        assert!(orchestrator.is_refreshing());

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.refresh().await })
            })
            .collect();
        for _ in 0..3 {
            orchestrator.trigger(RefreshReason::Event);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reader.balance_calls(), 1);

        reader.gate.add_permits(1);
        wait_until(|| reader.balance_calls() == 2).await;
        reader.gate.add_permits(1);

        assert_eq!(first.await.unwrap(), RefreshOutcome::Completed);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), RefreshOutcome::Coalesced);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reader.balance_calls(), 2);
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.completed_cycles, 2);
        assert_eq!(snapshot.balance, Some(Decimal::from(20)));
        assert!(!orchestrator.is_refreshing());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot_and_marks_it_stale() {
        let reader = Arc::new(GatedReader::new(true));
        let orchestrator = SyncOrchestrator::new(reader.clone(), "banco/+/events");
        orchestrator.refresh().await;
        let before = orchestrator.snapshot();

        reader.fail_summary.store(true, Ordering::SeqCst);
        orchestrator.refresh().await;

        let after = orchestrator.snapshot();
        assert_eq!(after.balance, before.balance);
        assert_eq!(after.summary, before.summary);
        assert_eq!(after.last_refresh_at, before.last_refresh_at);
        assert!(after.stale);
        assert!(after.last_error.unwrap().contains("500"));
        assert_eq!(after.completed_cycles, 2);

        reader.fail_summary.store(false, Ordering::SeqCst);
        orchestrator.refresh().await;
        let recovered = orchestrator.snapshot();
        assert!(!recovered.stale);
        assert_eq!(recovered.balance, Some(Decimal::from(30)));
    }

    #[tokio::test]
    async fn transactions_and_events_trigger_refreshes() {
        let reader = Arc::new(GatedReader::new(true));
        let orchestrator = SyncOrchestrator::new(reader.clone(), "banco/+/events");
        let mut updates = orchestrator.watch();

        let request = TransactionRequest::Deposit {
            amount: Decimal::from(100),
        };
        let result = TransactionResult {
            new_balance: Decimal::from(100),
        };
        TransactionObserver::transaction_completed(&orchestrator, &request, &result);
        updates.wait_for(|s| s.completed_cycles >= 1).await.unwrap();

        let message = EventMessage {
            topic: "banco/alice/events".to_string(),
            payload: serde_json::json!({"tipo": "deposit"}),
        };
        EventHandler::handle(&orchestrator, &message).await;
        updates.wait_for(|s| s.completed_cycles >= 2).await.unwrap();

        assert_eq!(reader.balance_calls(), 2);
    }

    #[tokio::test]
    async fn dropped_refresh_future_does_not_wedge_the_machine() {
        let reader = Arc::new(GatedReader::new(false));
        let orchestrator = SyncOrchestrator::new(reader.clone(), "banco/+/events");

        let abandoned = tokio::time::timeout(Duration::from_millis(20), orchestrator.refresh()).await;
        assert!(abandoned.is_err());

        reader.gate.add_permits(1);
        wait_until(|| !orchestrator.is_refreshing()).await;
        assert_eq!(orchestrator.snapshot().completed_cycles, 1);
    }
}
