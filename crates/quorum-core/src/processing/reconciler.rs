//! Status reconciliation loop for server-side background jobs.
//!
//! The reconciler polls the snapshot endpoint on a fixed interval while
//! anything is non-terminal, publishes each snapshot on a watch channel,
//! and goes idle once the dashboard is all-terminal. Observers (badge,
//! dashboard) subscribe to the one shared loop instead of each owning a
//! timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ProcessingClient};
use crate::config::Config;

use super::types::{JobKind, PollTier, Snapshot, StatusFilter};

/// Poll loop bookkeeping, guarded by one mutex so re-arm requests and
/// idle shutdown cannot race each other.
#[derive(Default)]
struct PollState {
    /// Tier and token of the loop currently running, if any
    current: Option<(PollTier, CancellationToken)>,
    /// Set when a re-arm request lands while the loop is mid-fetch; the
    /// idle check consumes it and polls once more instead of shutting
    /// down on what is by then a stale snapshot.
    rearm_requested: bool,
}

/// Keeps local knowledge of server-side job state eventually consistent.
#[derive(Clone)]
pub struct StatusReconciler {
    client: Arc<dyn ProcessingClient>,
    fast_interval: Duration,
    ambient_interval: Duration,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    active: Arc<Mutex<PollState>>,
}

impl StatusReconciler {
    pub fn new(client: Arc<dyn ProcessingClient>, config: &Config) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            client,
            fast_interval: config.fast_poll_interval,
            ambient_interval: config.ambient_poll_interval,
            snapshot_tx,
            active: Arc::new(Mutex::new(PollState::default())),
        }
    }

    /// Subscribe to published snapshots. Starts with whatever was last
    /// observed, `None` before the first successful fetch.
    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Last published snapshot, if any.
    pub fn latest(&self) -> Option<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Start the poll loop if it is not already running.
    ///
    /// Called when a consumer comes up, and again whenever a newly-tracked
    /// unit is non-terminal (e.g. right after an upload is accepted) to
    /// re-arm a loop that went idle.
    pub async fn ensure_polling(&self, tier: PollTier) {
        let mut state = self.active.lock().await;
        if let Some((running_tier, token)) = &state.current {
            if !token.is_cancelled() {
                if tier == PollTier::Fast && *running_tier == PollTier::Ambient {
                    // Escalate: a badge-cadence loop cannot serve a
                    // consumer that knows items are mid-flight.
                    token.cancel();
                } else {
                    // The loop may be mid-fetch against a snapshot that
                    // predates this request; record the re-arm so its
                    // idle check does not act on stale data.
                    state.rearm_requested = true;
                    return;
                }
            }
        }
        let token = CancellationToken::new();
        state.current = Some((tier, token.clone()));
        state.rearm_requested = false;
        drop(state);

        let reconciler = self.clone();
        tokio::spawn(async move {
            reconciler.run_loop(tier, token).await;
        });
    }

    /// Tear the loop down. Observers keep the last published snapshot.
    pub async fn stop(&self) {
        let mut state = self.active.lock().await;
        state.rearm_requested = false;
        if let Some((_, token)) = state.current.take() {
            token.cancel();
        }
    }

    /// Fetch once outside the loop cadence and publish the result.
    pub async fn refresh(&self) -> Result<Snapshot, ApiError> {
        let snapshot = self.client.fetch_snapshot(StatusFilter::All).await?;
        self.snapshot_tx.send_replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// Request a server-side re-run of a failed unit, then refresh so
    /// observers see it leave `failed`. The retry endpoint only
    /// acknowledges; the new state comes from the next snapshot.
    pub async fn retry(&self, kind: JobKind, id: &str) -> Result<(), ApiError> {
        self.client.retry(kind, id).await?;
        let snapshot = self.refresh().await?;
        if snapshot.has_active() {
            self.ensure_polling(PollTier::Fast).await;
        }
        Ok(())
    }

    async fn run_loop(&self, tier: PollTier, cancel: CancellationToken) {
        let period = match tier {
            PollTier::Fast => self.fast_interval,
            PollTier::Ambient => self.ambient_interval,
        };
        let mut ticker = tokio::time::interval(period);
        // A tick that lands while a fetch is still in flight is a missed
        // beat, not a queued request.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(?tier, "Status poll loop started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Status poll loop cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    match self.client.fetch_snapshot(StatusFilter::All).await {
                        Ok(snapshot) => {
                            let idle = tier == PollTier::Fast && !snapshot.has_active();
                            self.snapshot_tx.send_replace(Some(snapshot));
                            if idle {
                                let mut state = self.active.lock().await;
                                if std::mem::take(&mut state.rearm_requested) {
                                    // A unit became trackable while this
                                    // fetch was in flight; the snapshot
                                    // is stale, so keep polling.
                                    continue;
                                }
                                tracing::debug!("All jobs terminal; fast poll loop going idle");
                                // Mark the stored token cancelled so
                                // ensure_polling can re-arm later.
                                cancel.cancel();
                                break;
                            }
                        }
                        Err(err) => {
                            // Transient poll failures never stop the loop;
                            // the next tick usually recovers.
                            tracing::warn!(error = %err, "Snapshot fetch failed");
                        }
                    }
                }
            }
        }

        tracing::debug!("Status poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{ProcessingEntry, ProcessingStats, ProcessingStatus};

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    /// Scripted snapshot source. Pops queued snapshots in order and keeps
    /// repeating the last one; tracks fetch counts and overlap.
    struct MockProcessing {
        script: Mutex<VecDeque<Result<Snapshot, ApiError>>>,
        last: Mutex<Snapshot>,
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fetch_delay: Duration,
        retried: Mutex<Vec<(JobKind, String)>>,
    }

    impl MockProcessing {
        fn new(script: Vec<Result<Snapshot, ApiError>>) -> Arc<Self> {
            Self::with_delay(script, Duration::ZERO)
        }

        fn with_delay(script: Vec<Result<Snapshot, ApiError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(Snapshot::default()),
                fetches: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fetch_delay: delay,
                retried: Mutex::new(Vec::new()),
            })
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProcessingClient for MockProcessing {
        async fn fetch_snapshot(&self, _filter: StatusFilter) -> Result<Snapshot, ApiError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.fetches.fetch_add(1, Ordering::SeqCst);

            if self.fetch_delay > Duration::ZERO {
                tokio::time::sleep(self.fetch_delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let next = self.script.lock().await.pop_front();
            match next {
                Some(Ok(snapshot)) => {
                    *self.last.lock().await = snapshot.clone();
                    Ok(snapshot)
                }
                Some(Err(err)) => Err(err),
                None => Ok(self.last.lock().await.clone()),
            }
        }

        async fn retry(&self, kind: JobKind, id: &str) -> Result<(), ApiError> {
            self.retried.lock().await.push((kind, id.to_string()));
            Ok(())
        }
    }

    fn active_snapshot() -> Snapshot {
        Snapshot {
            stats: ProcessingStats {
                pending: 1,
                processing: 1,
                completed_today: 0,
                failed_today: 0,
            },
            items: vec![ProcessingEntry {
                id: "job-1".to_string(),
                kind: JobKind::Document,
                title: "agenda.pdf".to_string(),
                owner: "notebook-1".to_string(),
                status: ProcessingStatus::Processing,
                error: None,
                created_at: Utc::now(),
            }],
        }
    }

    fn idle_snapshot() -> Snapshot {
        Snapshot {
            stats: ProcessingStats {
                pending: 0,
                processing: 0,
                completed_today: 4,
                failed_today: 1,
            },
            items: Vec::new(),
        }
    }

    fn reconciler_with(client: Arc<MockProcessing>) -> StatusReconciler {
        StatusReconciler::new(client, &Config::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_fixed_interval_while_active() {
        let mock = MockProcessing::new(vec![Ok(active_snapshot())]);
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Fast).await;

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.fetch_count(), 1);
        assert!(reconciler.latest().unwrap().has_active());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.fetch_count(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mock.fetch_count(), 4);

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_loop_goes_idle_when_all_terminal() {
        let mock = MockProcessing::new(vec![Ok(idle_snapshot())]);
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Fast).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        // One fetch, then suppression; the snapshot is still published.
        assert_eq!(mock.fetch_count(), 1);
        let snapshot = reconciler.latest().unwrap();
        assert_eq!(snapshot.stats.completed_today, 4);
        assert_eq!(snapshot.stats.failed_today, 1);
        assert!(snapshot.items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearms_after_idle() {
        let mock = MockProcessing::new(vec![Ok(idle_snapshot()), Ok(active_snapshot())]);
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Fast).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.fetch_count(), 1);

        // A new non-terminal unit shows up; consumer re-arms.
        reconciler.ensure_polling(PollTier::Fast).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.fetch_count(), 2);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.fetch_count(), 3);

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_during_inflight_fetch_is_not_lost() {
        // The first fetch is already in flight when a new unit becomes
        // trackable; it resolves to an all-terminal snapshot taken
        // before that unit existed. The loop must poll again, not go
        // idle on stale data.
        let mock = MockProcessing::with_delay(
            vec![Ok(idle_snapshot()), Ok(active_snapshot())],
            Duration::from_secs(10),
        );
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Fast).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.fetch_count(), 1);

        // An upload is accepted mid-fetch; its consumer re-arms.
        reconciler.ensure_polling(PollTier::Fast).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(mock.fetch_count() >= 2, "fetches: {}", mock.fetch_count());
        assert!(reconciler.latest().unwrap().has_active());

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_request_escalates_ambient_loop() {
        let mock = MockProcessing::new(vec![Ok(active_snapshot())]);
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Ambient).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.fetch_count(), 1);

        // Uploads went mid-flight; the badge-cadence loop is replaced.
        reconciler.ensure_polling(PollTier::Fast).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.fetch_count(), 2);

        // The next poll arrives on the fast interval, well before the
        // ambient tier's next tick.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.fetch_count(), 3);

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_polling_is_idempotent_while_running() {
        let mock = MockProcessing::new(vec![Ok(active_snapshot())]);
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Fast).await;
        reconciler.ensure_polling(PollTier::Fast).await;
        reconciler.ensure_polling(PollTier::Fast).await;

        tokio::time::sleep(Duration::from_secs(5) + Duration::from_millis(100)).await;
        // One loop, not three: immediate tick plus one interval.
        assert_eq!(mock.fetch_count(), 2);

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_never_overlaps_ticks() {
        // Each fetch takes 12s against a 5s interval; ticks that land
        // mid-fetch are skipped rather than stacked.
        let mock = MockProcessing::with_delay(
            vec![Ok(active_snapshot())],
            Duration::from_secs(12),
        );
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Fast).await;
        tokio::time::sleep(Duration::from_secs(36)).await;

        assert_eq!(mock.max_in_flight.load(Ordering::SeqCst), 1);
        // 8 ticks elapsed but only ~3 fetches fit.
        assert!(mock.fetch_count() <= 4, "fetches: {}", mock.fetch_count());

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_does_not_stop_loop() {
        let mock = MockProcessing::new(vec![
            Err(ApiError::Network("connection reset".to_string())),
            Ok(active_snapshot()),
        ]);
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Fast).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.fetch_count(), 1);
        assert!(reconciler.latest().is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.fetch_count(), 2);
        assert!(reconciler.latest().is_some());

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let mock = MockProcessing::new(vec![Ok(active_snapshot())]);
        let reconciler = reconciler_with(mock.clone());

        reconciler.ensure_polling(PollTier::Fast).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        reconciler.stop().await;

        let before = mock.fetch_count();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mock.fetch_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_hits_endpoint_then_refreshes() {
        let mock = MockProcessing::new(vec![Ok(active_snapshot())]);
        let reconciler = reconciler_with(mock.clone());

        reconciler
            .retry(JobKind::MeetingMinutes, "job-9")
            .await
            .unwrap();

        let retried = mock.retried.lock().await;
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0], (JobKind::MeetingMinutes, "job-9".to_string()));
        drop(retried);

        // Retry refreshed and, since the snapshot is active, re-armed.
        assert!(mock.fetch_count() >= 1);
        assert!(reconciler.latest().unwrap().has_active());

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_observe_published_snapshots() {
        let mock = MockProcessing::new(vec![Ok(active_snapshot())]);
        let reconciler = reconciler_with(mock.clone());
        let mut rx = reconciler.subscribe();

        reconciler.ensure_polling(PollTier::Ambient).await;
        rx.changed().await.unwrap();
        assert!(rx.borrow().as_ref().unwrap().has_active());

        reconciler.stop().await;
    }
}
