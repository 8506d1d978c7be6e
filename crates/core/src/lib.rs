pub mod audit;
pub mod batch;
pub mod circuit_breaker;
pub mod clock;
pub mod dedupe;
pub mod dispatch;
pub mod mocks;
pub mod notification;

pub use audit::{
    AuditContext, AuditEntry, AuditFilter, AuditLog, AuditStats, AuditStatus, AuditStore,
    InMemoryAuditStore,
};
pub use batch::BatchCoalescer;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
pub use clock::{Clock, SystemClock};
pub use dedupe::Deduplicator;
pub use dispatch::{QueuedRequest, RequestResult};
pub use notification::{NotificationKind, NotificationSink, Notifier, TracingSink};

// Re-export config and error types so callers need only one dependency
pub use portal_config::{
    AuditConfig, BatchConfig, CircuitBreakerConfig, CircuitState, DedupeConfig, ResilienceConfig,
};
pub use portal_errors::{PortalError, PortalResult};
