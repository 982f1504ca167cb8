//! Scheduling building blocks
//!
//! Port claims, hostname gates, retry backoff, broadcast fan-out, response
//! classification, header identities, metrics and lifecycle events.

pub mod backoff;
pub mod broadcast;
pub mod classifier;
pub mod events;
pub mod gates;
pub mod identity;
pub mod metrics;
pub mod ports;

// Re-export commonly used types
pub use backoff::RetryBackoff;
pub use broadcast::{PortOutcome, broadcast, pick_survivor};
pub use classifier::{ResponseClassifier, SignatureClassifier, Verdict};
pub use events::{
    AttemptEvent, EventDispatcher, EventHandler, ExhaustedEvent, FailureEvent, FallbackEvent,
    FallbackOutcomeEvent, FetchEvent, LoggingHandler, MetricsHandler, ReleaseEvent, RetryEvent,
    SuccessEvent,
};
pub use gates::{GateError, HostnameGates};
pub use identity::{BrowserType, HeaderIdentityGenerator};
pub use metrics::{MetricsCollector, MetricsSnapshot, OutcomeStats};
pub use ports::{Port, PortClaim, PortError, PortPool};
