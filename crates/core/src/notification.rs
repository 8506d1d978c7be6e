//! User-facing notification side channel shared by all controllers.

use std::fmt;
use std::sync::Arc;

use portal_errors::PortalError;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
        };
        f.write_str(s)
    }
}

/// Toast/alert emitter. Implementations must not panic.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: NotificationKind, title: &str, message: &str);
}

/// Default sink: renders notifications as tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
        match kind {
            NotificationKind::Error => error!(notification.title = title, "{message}"),
            NotificationKind::Warning => warn!(notification.title = title, "{message}"),
            NotificationKind::Success | NotificationKind::Info => {
                info!(notification.title = title, "{message}")
            }
        }
    }
}

pub type ErrorCallback = Arc<dyn Fn(&PortalError) + Send + Sync>;
pub type SuccessCallback = Arc<dyn Fn() + Send + Sync>;

/// Sink plus the per-controller `show_toast` switch and optional callbacks.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    show_toast: bool,
    on_error: Option<ErrorCallback>,
    on_success: Option<SuccessCallback>,
}

impl Notifier {
    pub fn new(show_toast: bool) -> Self {
        Self {
            sink: Arc::new(TracingSink),
            show_toast,
            on_error: None,
            on_success: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PortalError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn show_toast(&self) -> bool {
        self.show_toast
    }

    pub fn success(&self) {
        if let Some(callback) = &self.on_success {
            callback();
        }
    }

    /// Forwards `error` to the error callback, then toasts if enabled.
    pub fn failure(&self, error: &PortalError, title: &str, message: &str) {
        if let Some(callback) = &self.on_error {
            callback(error);
        }
        self.toast(NotificationKind::Error, title, message);
    }

    pub fn toast(&self, kind: NotificationKind, title: &str, message: &str) {
        if self.show_toast {
            self.sink.notify(kind, title, message);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("show_toast", &self.show_toast)
            .field("on_error", &self.on_error.is_some())
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}
