//! Shared plumbing for controllers that hold requests and dispatch them later:
//! the queued request type, the per-id result book, the all-settled join and
//! the notifier/clock pair read by spawned tasks.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use portal_errors::{PortalError, PortalResult};

use crate::clock::{Clock, SystemClock};
use crate::notification::Notifier;

pub type BoxedOperation<T> = Box<dyn FnOnce() -> BoxFuture<'static, PortalResult<T>> + Send>;

/// A deferred operation waiting in a controller's pending set.
pub struct QueuedRequest<T> {
    pub id: String,
    pub operation: BoxedOperation<T>,
    pub enqueued_at: Instant,
}

impl<T: Send + 'static> QueuedRequest<T> {
    pub fn new<F, Fut>(id: String, operation: F, enqueued_at: Instant) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PortalResult<T>> + Send + 'static,
    {
        Self {
            id,
            operation: Box::new(move || operation().boxed()),
            enqueued_at,
        }
    }
}

impl<T> fmt::Debug for QueuedRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Snapshot returned by `get_result`.
#[derive(Debug, Clone)]
pub struct RequestResult<T> {
    pub data: Option<T>,
    pub error: Option<PortalError>,
    pub is_loading: bool,
}

impl<T> RequestResult<T> {
    pub fn is_settled(&self) -> bool {
        self.data.is_some() || self.error.is_some()
    }
}

struct HookSet {
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

/// Notifier and clock of a timer-driven controller.
///
/// Timer tasks share the controller's state, so builder calls swap these in
/// place instead of requiring exclusive ownership.
pub(crate) struct Hooks {
    set: StdRwLock<HookSet>,
}

impl Hooks {
    pub(crate) fn new(show_toast: bool) -> Self {
        Self {
            set: StdRwLock::new(HookSet {
                notifier: Notifier::new(show_toast),
                clock: Arc::new(SystemClock),
            }),
        }
    }

    pub(crate) fn notifier(&self) -> Notifier {
        self.set.read().unwrap_or_else(PoisonError::into_inner).notifier.clone()
    }

    pub(crate) fn now(&self) -> Instant {
        self.set.read().unwrap_or_else(PoisonError::into_inner).clock.now()
    }

    pub(crate) fn set_clock(&self, clock: Arc<dyn Clock>) {
        self.set.write().unwrap_or_else(PoisonError::into_inner).clock = clock;
    }

    pub(crate) fn update_notifier(&self, f: impl FnOnce(Notifier) -> Notifier) {
        let mut set = self.set.write().unwrap_or_else(PoisonError::into_inner);
        let notifier = std::mem::take(&mut set.notifier);
        set.notifier = f(notifier);
    }
}

/// Settled outcomes keyed by request id plus the ids currently in flight.
///
/// An id is in at most one of `results` and `errors`. Every dispatch gets a
/// token from [`start`](Self::start); an outcome is only recorded while its
/// token is still the one in flight for that id.
#[derive(Debug)]
pub(crate) struct ResultBook<T> {
    results: HashMap<String, T>,
    errors: HashMap<String, PortalError>,
    in_flight: HashMap<String, u64>,
    next_token: u64,
}

impl<T: Clone> ResultBook<T> {
    pub(crate) fn new() -> Self {
        Self {
            results: HashMap::new(),
            errors: HashMap::new(),
            in_flight: HashMap::new(),
            next_token: 0,
        }
    }

    pub(crate) fn forget(&mut self, id: &str) {
        self.results.remove(id);
        self.errors.remove(id);
    }

    /// Marks `id` in flight and returns the token its outcome must present.
    pub(crate) fn start(&mut self, id: &str) -> u64 {
        self.next_token += 1;
        self.in_flight.insert(id.to_string(), self.next_token);
        self.next_token
    }

    fn is_current(&self, id: &str, token: u64) -> bool {
        self.in_flight.get(id) == Some(&token)
    }

    /// Drops the in-flight mark without recording anything.
    pub(crate) fn abandon(&mut self, id: &str, token: u64) {
        if self.is_current(id, token) {
            self.in_flight.remove(id);
        }
    }

    /// Returns `false` when a newer dispatch owns `id` and the outcome was dropped.
    pub(crate) fn record(&mut self, id: String, token: u64, outcome: &PortalResult<T>) -> bool {
        if !self.is_current(&id, token) {
            return false;
        }
        self.in_flight.remove(&id);
        match outcome {
            Ok(value) => {
                self.errors.remove(&id);
                self.results.insert(id, value.clone());
            }
            Err(error) => {
                self.results.remove(&id);
                self.errors.insert(id, error.clone());
            }
        }
        true
    }

    pub(crate) fn lookup(&self, id: &str, pending: bool) -> RequestResult<T> {
        RequestResult {
            data: self.results.get(id).cloned(),
            error: self.errors.get(id).cloned(),
            is_loading: pending || self.in_flight.contains_key(id),
        }
    }

    pub(crate) fn clear_settled(&mut self) {
        self.results.clear();
        self.errors.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.clear_settled();
        self.in_flight.clear();
    }
}

/// Starts every operation and waits until all of them have settled.
///
/// A panic inside one operation's future becomes that item's error; a panic
/// while *creating* the futures propagates and fails the whole dispatch.
async fn settle_all<T: Send + 'static>(
    requests: Vec<QueuedRequest<T>>,
) -> Vec<(String, PortalResult<T>)> {
    let settled = requests.into_iter().map(|request| {
        let id = request.id;
        let future = (request.operation)();
        async move {
            let outcome = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PortalError::internal(panic_message(panic.as_ref()))));
            (id, outcome)
        }
    });
    join_all(settled).await
}

/// Runs [`settle_all`] on its own task so that a dispatch-level panic is
/// reported as [`PortalError::BatchDispatch`] instead of unwinding the caller.
pub(crate) async fn dispatch_all<T: Send + 'static>(
    requests: Vec<QueuedRequest<T>>,
) -> PortalResult<Vec<(String, PortalResult<T>)>> {
    tokio::spawn(settle_all(requests)).await.map_err(|join_error| {
        let reason = if join_error.is_panic() {
            panic_message(join_error.into_panic().as_ref())
        } else {
            join_error.to_string()
        };
        PortalError::BatchDispatch(reason)
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "operation panicked".to_string()
    }
}
