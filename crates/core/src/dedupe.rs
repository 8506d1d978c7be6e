//! Key-based trailing deduplication.
//!
//! At most one request is pending per key. Registering under a key that is
//! already pending replaces the stored operation and restarts its age, so a
//! burst of registrations collapses into a single run of the last one. A
//! ticker with period `dedupe_window` dispatches every entry at least one
//! window old.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error};

use portal_config::DedupeConfig;
use portal_errors::{PortalError, PortalResult};

use crate::clock::Clock;
use crate::dispatch::{dispatch_all, Hooks, QueuedRequest, RequestResult, ResultBook};
use crate::notification::NotificationSink;

struct DedupState<T> {
    pending: HashMap<String, QueuedRequest<T>>,
    book: ResultBook<T>,
    /// Bumped by `clear_results`; outcomes of older flushes are dropped.
    generation: u64,
    superseded: u64,
}

struct DedupInner<T> {
    config: DedupeConfig,
    hooks: Hooks,
    state: Mutex<DedupState<T>>,
}

/// Collapses repeated registrations under one key into a single execution.
///
/// The ticker task starts with the first registration and only holds a weak
/// reference, so dropping the deduplicator stops it and discards anything
/// still pending.
pub struct Deduplicator<T> {
    inner: Arc<DedupInner<T>>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: DedupeConfig) -> Self {
        Self {
            inner: Arc::new(DedupInner {
                hooks: Hooks::new(config.show_toast),
                config,
                state: Mutex::new(DedupState {
                    pending: HashMap::new(),
                    book: ResultBook::new(),
                    generation: 0,
                    superseded: 0,
                }),
            }),
            ticker: StdMutex::new(None),
        }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        self.inner.hooks.set_clock(clock);
        self
    }

    pub fn with_sink(self, sink: Arc<dyn NotificationSink>) -> Self {
        self.inner.hooks.update_notifier(|n| n.with_sink(sink));
        self
    }

    pub fn on_error<F>(self, callback: F) -> Self
    where
        F: Fn(&PortalError) + Send + Sync + 'static,
    {
        self.inner.hooks.update_notifier(|n| n.on_error(callback));
        self
    }

    pub fn on_success<F>(self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.update_notifier(|n| n.on_success(callback));
        self
    }

    pub fn config(&self) -> &DedupeConfig {
        &self.inner.config
    }

    /// Registers `operation` under `id`, replacing any pending one.
    /// The replaced operation is dropped without ever running.
    pub async fn add_request<F, Fut>(&self, operation: F, id: impl Into<String>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PortalResult<T>> + Send + 'static,
    {
        self.ensure_ticker();

        let id = id.into();
        let request = QueuedRequest::new(id.clone(), operation, self.inner.hooks.now());

        let mut state = self.inner.state.lock().await;
        state.book.forget(&id);
        if state.pending.insert(id.clone(), request).is_some() {
            state.superseded += 1;
            counter!("dedupe_superseded_total").increment(1);
            debug!(request_id = %id, "Pending request superseded");
        }
    }

    pub async fn get_result(&self, id: &str) -> RequestResult<T> {
        let state = self.inner.state.lock().await;
        let pending = state.pending.contains_key(id);
        state.book.lookup(id, pending)
    }

    /// Wipes pending requests and every recorded outcome in one step.
    /// Operations already running finish, but their outcomes are discarded.
    pub async fn clear_results(&self) {
        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        state.pending.clear();
        state.book.clear();
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    pub async fn superseded_count(&self) -> u64 {
        self.inner.state.lock().await.superseded
    }

    fn ensure_ticker(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_none() {
            *ticker = Some(DedupInner::spawn_ticker(Arc::downgrade(&self.inner)));
        }
    }
}

impl<T> Drop for Deduplicator<T> {
    fn drop(&mut self) {
        let ticker = self.ticker.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
    }
}

impl<T> DedupInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn spawn_ticker(weak: Weak<Self>) -> JoinHandle<()> {
        let window = match weak.upgrade() {
            Some(inner) => inner.config.dedupe_window,
            None => return tokio::spawn(async {}),
        };
        tokio::spawn(async move {
            let mut interval = interval_at(tokio::time::Instant::now() + window, window);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                // A slow flush must not hold back the next tick
                tokio::spawn(inner.flush_due());
            }
        })
    }

    async fn flush_due(self: Arc<Self>) {
        let window = self.config.dedupe_window;
        let (generation, due, tokens) = {
            let mut state = self.state.lock().await;
            let now = self.hooks.now();
            let due_ids: Vec<String> = state
                .pending
                .iter()
                .filter(|(_, r)| now.saturating_duration_since(r.enqueued_at) >= window)
                .map(|(id, _)| id.clone())
                .collect();

            let mut due = Vec::with_capacity(due_ids.len());
            let mut tokens = Vec::with_capacity(due_ids.len());
            for id in due_ids {
                if let Some(request) = state.pending.remove(&id) {
                    tokens.push((id.clone(), state.book.start(&id)));
                    due.push(request);
                }
            }
            (state.generation, due, tokens)
        };
        if due.is_empty() {
            return;
        }

        debug!(count = tokens.len(), "Flushing deduplicated requests");
        counter!("dedupe_dispatched_total").increment(tokens.len() as u64);

        let result = dispatch_all(due).await;
        let notifier = self.hooks.notifier();
        match result {
            Ok(outcomes) => {
                let mut failures = Vec::new();
                let mut succeeded = 0usize;
                {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        debug!("Results cleared during flush; discarding outcomes");
                        return;
                    }
                    for ((id, token), (_, outcome)) in tokens.iter().zip(outcomes) {
                        // Re-registered while running: the newer request owns the key.
                        // A later flush may already have started it, which the token catches.
                        if state.pending.contains_key(id) {
                            state.book.abandon(id, *token);
                        } else if !state.book.record(id.clone(), *token, &outcome) {
                            debug!(request_id = %id, "Outcome superseded by a newer flush");
                        }
                        match outcome {
                            Ok(_) => succeeded += 1,
                            Err(err) => failures.push((id.clone(), err)),
                        }
                    }
                }

                for _ in 0..succeeded {
                    notifier.success();
                }
                for (id, err) in failures {
                    error!(request_id = %id, error = %err, "Deduplicated request failed");
                    notifier.failure(&err, "Request failed", &format!("{id}: {}", err.message()));
                }
            }
            Err(err) => {
                {
                    let mut state = self.state.lock().await;
                    if state.generation == generation {
                        for (id, token) in &tokens {
                            state.book.abandon(id, *token);
                        }
                    }
                }
                error!(error = %err, count = tokens.len(), "Dedupe flush failed");
                notifier.failure(&err, "Dedupe failed", &err.message());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingSink;
    use crate::notification::NotificationKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    fn config() -> DedupeConfig {
        DedupeConfig {
            dedupe_window: Duration::from_millis(1000),
            show_toast: true,
        }
    }

    async fn register_counted(
        dedup: &Deduplicator<usize>,
        counters: &Arc<Vec<AtomicUsize>>,
        slot: usize,
        id: &str,
    ) {
        let counters = Arc::clone(counters);
        dedup
            .add_request(
                move || async move {
                    counters[slot].fetch_add(1, Ordering::SeqCst);
                    Ok(slot)
                },
                id,
            )
            .await;
    }

    fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
        Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_last_registration() {
        let dedup = Deduplicator::new(config());
        let calls = counters(3);

        register_counted(&dedup, &calls, 0, "tickets:u1").await;
        sleep(Duration::from_millis(100)).await;
        register_counted(&dedup, &calls, 1, "tickets:u1").await;
        sleep(Duration::from_millis(100)).await;
        register_counted(&dedup, &calls, 2, "tickets:u1").await;

        assert_eq!(dedup.pending_len().await, 1);
        assert_eq!(dedup.superseded_count().await, 2);

        // First tick at 1000ms: the last registration is only 800ms old
        sleep(Duration::from_millis(1300)).await;
        assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 0));
        assert!(dedup.get_result("tickets:u1").await.is_loading);

        sleep(Duration::from_millis(700)).await;
        assert_eq!(calls[0].load(Ordering::SeqCst), 0);
        assert_eq!(calls[1].load(Ordering::SeqCst), 0);
        assert_eq!(calls[2].load(Ordering::SeqCst), 1);

        let result = dedup.get_result("tickets:u1").await;
        assert_eq!(result.data, Some(2));
        assert!(!result.is_loading);
        assert_eq!(dedup.pending_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_flush_together() {
        let dedup = Deduplicator::new(config());
        let calls = counters(2);

        register_counted(&dedup, &calls, 0, "a").await;
        register_counted(&dedup, &calls, 1, "b").await;
        sleep(Duration::from_millis(1100)).await;

        assert_eq!(dedup.get_result("a").await.data, Some(0));
        assert_eq!(dedup.get_result("b").await.data, Some(1));
        assert_eq!(dedup.superseded_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_recorded_and_reported() {
        let sink = Arc::new(RecordingSink::new());
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let dedup: Deduplicator<u32> = Deduplicator::new(config())
            .with_sink(sink.clone())
            .on_error(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        dedup
            .add_request(|| async { Err(PortalError::Timeout("upstream".to_string())) }, "refresh")
            .await;
        dedup.add_request(|| async { Ok(4) }, "other").await;
        sleep(Duration::from_millis(1100)).await;

        let failed = dedup.get_result("refresh").await;
        assert_eq!(failed.error, Some(PortalError::Timeout("upstream".to_string())));
        assert!(failed.data.is_none());
        assert_eq!(dedup.get_result("other").await.data, Some(4));

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count_of(NotificationKind::Error), 1);
        assert!(sink.notifications()[0].message.starts_with("refresh: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_results_discards_pending_and_in_flight() {
        let dedup = Deduplicator::new(config());
        let calls = counters(1);

        dedup
            .add_request(
                || async {
                    sleep(Duration::from_millis(500)).await;
                    Ok(1usize)
                },
                "slow",
            )
            .await;
        register_counted(&dedup, &calls, 0, "queued").await;
        sleep(Duration::from_millis(1100)).await;
        assert!(dedup.get_result("slow").await.is_loading);

        // "queued" already ran; re-register it so it is pending at clear time
        register_counted(&dedup, &calls, 0, "queued").await;
        dedup.clear_results().await;

        assert_eq!(dedup.pending_len().await, 0);
        assert!(!dedup.get_result("queued").await.is_loading);
        assert!(!dedup.get_result("queued").await.is_settled());

        sleep(Duration::from_millis(2000)).await;
        let slow = dedup.get_result("slow").await;
        assert!(!slow.is_loading);
        assert!(!slow.is_settled());
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_flush_does_not_overwrite_newer_run() {
        let dedup: Deduplicator<u32> = Deduplicator::new(config());
        dedup
            .add_request(
                || async {
                    sleep(Duration::from_millis(2500)).await;
                    Ok(1)
                },
                "tickets:u1",
            )
            .await;

        // First flush at 1000ms runs the slow request until 3500ms
        sleep(Duration::from_millis(1050)).await;
        assert!(dedup.get_result("tickets:u1").await.is_loading);
        dedup
            .add_request(
                || async {
                    sleep(Duration::from_millis(1000)).await;
                    Ok(2)
                },
                "tickets:u1",
            )
            .await;

        // The 3000ms flush starts the newer request; the older one settles at 3500ms
        sleep(Duration::from_millis(2550)).await;
        let result = dedup.get_result("tickets:u1").await;
        assert!(result.is_loading);
        assert!(result.data.is_none());

        sleep(Duration::from_millis(500)).await;
        let result = dedup.get_result("tickets:u1").await;
        assert!(!result.is_loading);
        assert_eq!(result.data, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_builders_apply_after_first_registration() {
        let dedup: Deduplicator<u32> = Deduplicator::new(config());
        dedup
            .add_request(|| async { Err(PortalError::operation("down")) }, "k")
            .await;

        let sink = Arc::new(RecordingSink::new());
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let dedup = dedup.with_sink(sink.clone()).on_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        sleep(Duration::from_millis(1100)).await;

        assert_eq!(dedup.get_result("k").await.error, Some(PortalError::operation("down")));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count_of(NotificationKind::Error), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_pending_work() {
        let calls = counters(1);
        let dedup = Deduplicator::new(config());
        register_counted(&dedup, &calls, 0, "k").await;
        drop(dedup);

        sleep(Duration::from_millis(3000)).await;
        assert_eq!(calls[0].load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_callback_per_executed_request() {
        let successes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&successes);
        let dedup: Deduplicator<u32> = Deduplicator::new(config()).on_success(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            dedup.add_request(|| async { Ok(1) }, "same").await;
        }
        sleep(Duration::from_millis(2100)).await;
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }
}
