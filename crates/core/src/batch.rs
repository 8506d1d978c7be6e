//! Time-windowed batch coalescing.
//!
//! Requests accumulate in a FIFO queue. A debounce timer of `batch_delay` is
//! re-armed on every enqueue while no batch is in flight; when it fires, up to
//! `batch_size` requests leave the queue together and run concurrently. Only
//! one batch is ever in flight, and leftovers wait for the next cycle.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use portal_config::BatchConfig;
use portal_errors::{PortalError, PortalResult};

use crate::clock::Clock;
use crate::dispatch::{dispatch_all, Hooks, QueuedRequest, RequestResult, ResultBook};
use crate::notification::NotificationSink;

struct BatchState<T> {
    queue: VecDeque<QueuedRequest<T>>,
    book: ResultBook<T>,
    is_processing: bool,
    timer: Option<JoinHandle<()>>,
    batches_dispatched: u64,
}

struct BatchInner<T> {
    config: BatchConfig,
    hooks: Hooks,
    state: Mutex<BatchState<T>>,
}

/// Groups independently submitted requests into concurrent batches.
///
/// Must be used from within a Tokio runtime; timers are spawned tasks.
pub struct BatchCoalescer<T> {
    inner: Arc<BatchInner<T>>,
}

impl<T> BatchCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                hooks: Hooks::new(config.show_toast),
                config,
                state: Mutex::new(BatchState {
                    queue: VecDeque::new(),
                    book: ResultBook::new(),
                    is_processing: false,
                    timer: None,
                    batches_dispatched: 0,
                }),
            }),
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

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Queues `operation` under `id`. Fire-and-forget: the outcome is read
    /// back later with [`get_result`](Self::get_result).
    pub async fn add_to_queue<F, Fut>(&self, operation: F, id: impl Into<String>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PortalResult<T>> + Send + 'static,
    {
        let id = id.into();
        let request = QueuedRequest::new(id.clone(), operation, self.inner.hooks.now());

        let mut state = self.inner.state.lock().await;
        state.book.forget(&id);
        state.queue.push_back(request);
        debug!(request_id = %id, queued = state.queue.len(), "Request queued for batching");

        if !state.is_processing {
            BatchInner::arm_timer(&self.inner, &mut state);
        }
    }

    pub async fn get_result(&self, id: &str) -> RequestResult<T> {
        let state = self.inner.state.lock().await;
        let pending = state.queue.iter().any(|r| r.id == id);
        state.book.lookup(id, pending)
    }

    /// Drops settled results and errors; queued and in-flight requests are kept.
    pub async fn clear_results(&self) {
        self.inner.state.lock().await.book.clear_settled();
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_processing(&self) -> bool {
        self.inner.state.lock().await.is_processing
    }

    pub async fn batches_dispatched(&self) -> u64 {
        self.inner.state.lock().await.batches_dispatched
    }
}

impl<T> BatchInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn arm_timer(inner: &Arc<Self>, state: &mut BatchState<T>) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let delay = inner.config.batch_delay;
        let inner = Arc::clone(inner);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.process_batch().await;
        }));
    }

    async fn process_batch(self: Arc<Self>) {
        let (batch, tokens) = {
            let mut state = self.state.lock().await;
            // From here on an enqueue must not abort this task
            state.timer = None;
            if state.is_processing || state.queue.is_empty() {
                return;
            }
            state.is_processing = true;
            state.batches_dispatched += 1;

            let take = self.config.batch_size.min(state.queue.len());
            let batch: Vec<QueuedRequest<T>> = state.queue.drain(..take).collect();
            let tokens: Vec<(String, u64)> = batch
                .iter()
                .map(|request| (request.id.clone(), state.book.start(&request.id)))
                .collect();
            (batch, tokens)
        };

        debug!(batch_size = tokens.len(), "Dispatching batch");
        counter!("batch_dispatched_total").increment(1);

        let result = dispatch_all(batch).await;
        let notifier = self.hooks.notifier();
        match result {
            Ok(outcomes) => {
                let mut failures = Vec::new();
                {
                    let mut state = self.state.lock().await;
                    for ((id, token), (_, outcome)) in tokens.iter().zip(outcomes) {
                        // Queued again while running: the newer request owns the id
                        if state.queue.iter().any(|r| r.id == *id) {
                            state.book.abandon(id, *token);
                        } else {
                            state.book.record(id.clone(), *token, &outcome);
                        }
                        if let Err(err) = outcome {
                            failures.push((id.clone(), err));
                        }
                    }
                }
                let succeeded = tokens.len() - failures.len();
                counter!("batch_items_total", "outcome" => "success").increment(succeeded as u64);
                counter!("batch_items_total", "outcome" => "failure")
                    .increment(failures.len() as u64);

                for _ in 0..succeeded {
                    notifier.success();
                }
                for (id, err) in failures {
                    error!(request_id = %id, error = %err, "Batched request failed");
                    notifier.failure(&err, "Request failed", &format!("{id}: {}", err.message()));
                }
            }
            Err(err) => {
                // Abandoned: the requests already left the queue and are not retried
                {
                    let mut state = self.state.lock().await;
                    for (id, token) in &tokens {
                        state.book.abandon(id, *token);
                    }
                }
                error!(error = %err, batch_size = tokens.len(), "Batch dispatch failed");
                notifier.failure(&err, "Batch failed", &err.message());
            }
        }

        let mut state = self.state.lock().await;
        state.is_processing = false;
        if !state.queue.is_empty() {
            Self::arm_timer(&self, &mut state);
        }
    }
}
