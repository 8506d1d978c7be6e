//! Circuit breaker implementation for resilience
//!
//! Isolates a calling code path from a persistently failing dependency.
//! After `failure_threshold` consecutive failures the breaker opens and stops
//! invoking the operation; once `reset_timeout` has elapsed a single probe is
//! let through to test recovery.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use portal_config::{CircuitBreakerConfig, CircuitState};
use portal_errors::{PortalError, PortalResult};

use crate::clock::{Clock, SystemClock};
use crate::notification::{NotificationKind, NotificationSink, Notifier};

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted while closed
    pub failure_count: u32,
    /// Time the circuit last opened
    pub last_failure_time: Option<Instant>,
    /// Time the current probe was admitted
    pub half_open_time: Option<Instant>,
    /// Calls that reached the operation
    pub total_calls: u64,
    /// Total successful calls
    pub successful_calls: u64,
    /// Total failed calls
    pub failed_calls: u64,
    /// Calls short-circuited while open
    pub rejected_calls: u64,
}

impl CircuitBreakerStats {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            half_open_time: None,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
        }
    }

    /// A half-open breaker is not reported as open: a probe is being let through.
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

impl Default for CircuitBreakerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Closed,
    Probe,
    Rejected,
}

/// Circuit breaker implementation
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<CircuitBreakerStats>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            notifier: Notifier::new(config.show_toast),
            config,
            clock: Arc::new(SystemClock),
            stats: Arc::new(RwLock::new(CircuitBreakerStats::new())),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = self.notifier.with_sink(sink);
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PortalError) + Send + Sync + 'static,
    {
        self.notifier = self.notifier.on_error(callback);
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier = self.notifier.on_success(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `operation` unless the circuit is open.
    ///
    /// Failures are reported through the notifier and swallowed; both a
    /// short-circuit and a failed operation yield `None`.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PortalResult<T>>,
    {
        self.call(operation).await.ok()
    }

    /// Same state machine as [`execute`](Self::execute), but surfaces
    /// [`PortalError::CircuitOpen`] on short-circuit and the operation's own
    /// error on failure.
    pub async fn call<F, Fut, T>(&self, operation: F) -> PortalResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PortalResult<T>>,
    {
        let admission = self.admit().await;

        if admission == Admission::Rejected {
            warn!(breaker = %self.name, "Circuit open, skipping call");
            counter!("circuit_breaker_calls_total", "breaker" => self.name.clone(), "outcome" => "rejected")
                .increment(1);
            self.notifier.toast(
                NotificationKind::Warning,
                "Service unavailable",
                &format!("{} is temporarily unavailable, request skipped", self.name),
            );
            return Err(PortalError::circuit_open(&self.name));
        }

        match operation().await {
            Ok(value) => {
                self.record_success(admission).await;
                counter!("circuit_breaker_calls_total", "breaker" => self.name.clone(), "outcome" => "success")
                    .increment(1);
                self.notifier.success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure(admission).await;
                error!(breaker = %self.name, error = %err, "Call failed");
                counter!("circuit_breaker_calls_total", "breaker" => self.name.clone(), "outcome" => "failure")
                    .increment(1);
                self.notifier
                    .failure(&err, "Request failed", &err.to_string());
                Err(err)
            }
        }
    }

    async fn admit(&self) -> Admission {
        let now = self.clock.now();
        let mut stats = self.stats.write().await;

        let admission = match stats.state {
            CircuitState::Closed => Admission::Closed,
            CircuitState::Open => {
                if elapsed_since(stats.last_failure_time, now) >= self.config.reset_timeout {
                    stats.state = CircuitState::HalfOpen;
                    stats.half_open_time = Some(now);
                    self.transitioned(CircuitState::HalfOpen);
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            // One probe at a time; a probe stuck past half_open_timeout gives up its slot
            CircuitState::HalfOpen => {
                if elapsed_since(stats.half_open_time, now) >= self.config.half_open_timeout {
                    debug!(breaker = %self.name, "Probe exceeded half_open_timeout, starting a new probe");
                    stats.half_open_time = Some(now);
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        };

        if admission == Admission::Rejected {
            stats.rejected_calls += 1;
        } else {
            stats.total_calls += 1;
        }
        admission
    }

    async fn record_success(&self, admission: Admission) {
        let mut stats = self.stats.write().await;
        stats.successful_calls += 1;

        if admission == Admission::Probe {
            stats.state = CircuitState::Closed;
            stats.failure_count = 0;
            stats.last_failure_time = None;
            stats.half_open_time = None;
            self.transitioned(CircuitState::Closed);
        } else if stats.state == CircuitState::Closed {
            stats.failure_count = 0;
        }
    }

    async fn record_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let mut stats = self.stats.write().await;
        stats.failed_calls += 1;

        if admission == Admission::Probe && stats.state != CircuitState::Closed {
            // Failed probe re-opens without touching the threshold counter
            stats.state = CircuitState::Open;
            stats.last_failure_time = Some(now);
            self.transitioned(CircuitState::Open);
        } else if stats.state == CircuitState::Closed {
            stats.failure_count += 1;
            if stats.failure_count >= self.config.failure_threshold {
                stats.state = CircuitState::Open;
                stats.last_failure_time = Some(now);
                self.transitioned(CircuitState::Open);
            }
        }
    }

    fn transitioned(&self, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(breaker = %self.name, "Circuit opened"),
            CircuitState::HalfOpen => debug!(breaker = %self.name, "Circuit half-open, probing"),
            CircuitState::Closed => info!(breaker = %self.name, "Circuit closed"),
        }
        counter!("circuit_breaker_state_transitions_total", "breaker" => self.name.clone(), "to" => format!("{to:?}"))
            .increment(1);
    }

    pub async fn get_state(&self) -> CircuitState {
        self.stats.read().await.state
    }

    pub async fn is_open(&self) -> bool {
        self.stats.read().await.is_open()
    }

    pub async fn get_stats(&self) -> CircuitBreakerStats {
        self.stats.read().await.clone()
    }

    /// Forces the closed state with cleared failure bookkeeping.
    pub async fn reset(&self) {
        let mut stats = self.stats.write().await;
        *stats = CircuitBreakerStats::new();
        info!(breaker = %self.name, "Circuit manually reset");
    }

    pub async fn force_open(&self) {
        let now = self.clock.now();
        let mut stats = self.stats.write().await;
        stats.state = CircuitState::Open;
        stats.last_failure_time = Some(now);
        self.transitioned(CircuitState::Open);
    }
}

impl Clone for CircuitBreaker {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            notifier: self.notifier.clone(),
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
        }
    }
}

fn elapsed_since(since: Option<Instant>, now: Instant) -> Duration {
    since
        .map(|t| now.saturating_duration_since(t))
        .unwrap_or(Duration::MAX)
}
