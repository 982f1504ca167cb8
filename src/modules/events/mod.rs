//! Event system for the fetch scheduler.
//!
//! Every attempt, release, retry and fallback is reported as a
//! [`FetchEvent`]. Handlers turn them into logs and metrics.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;
use crate::backends::FetchMethod;

#[derive(Debug, Clone)]
pub struct AttemptEvent {
    pub url: Url,
    pub hostname: String,
    pub port: u16,
    pub attempt: usize,
    pub method: FetchMethod,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SuccessEvent {
    pub url: Url,
    pub hostname: String,
    pub port: u16,
    pub attempt: usize,
    pub status: Option<u16>,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub url: Url,
    pub hostname: String,
    /// `None` when no port could be claimed.
    pub port: Option<u16>,
    pub attempt: usize,
    pub error: String,
    pub timeout: bool,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReleaseEvent {
    pub hostname: String,
    pub port: u16,
    pub cooldown: Duration,
    pub held_for: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub url: Url,
    pub attempt: usize,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FallbackEvent {
    pub url: Url,
    pub hostname: String,
    pub trigger_port: u16,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FallbackOutcomeEvent {
    pub url: Url,
    pub hostname: String,
    pub ports: usize,
    pub survivors: usize,
    pub chosen_port: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExhaustedEvent {
    pub url: Url,
    pub hostname: String,
    pub attempts: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    AttemptStarted(AttemptEvent),
    AttemptSucceeded(SuccessEvent),
    AttemptFailed(FailureEvent),
    ClaimReleased(ReleaseEvent),
    Retry(RetryEvent),
    FallbackTriggered(FallbackEvent),
    FallbackCompleted(FallbackOutcomeEvent),
    Exhausted(ExhaustedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
///
/// Lifecycle events go to `info` when verbose and `debug` otherwise.
/// Failures are always `warn`.
#[derive(Debug, Default)]
pub struct LoggingHandler {
    verbose: bool,
}

impl LoggingHandler {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn lifecycle(&self, message: std::fmt::Arguments<'_>) {
        if self.verbose {
            log::info!("{message}");
        } else {
            log::debug!("{message}");
        }
    }
}

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::AttemptStarted(start) => {
                self.lifecycle(format_args!(
                    "-> {} {} via port {} (attempt {})",
                    start.method, start.url, start.port, start.attempt
                ));
            }
            FetchEvent::AttemptSucceeded(ok) => {
                self.lifecycle(format_args!(
                    "<- {} via port {} -> {} ({:.2}s)",
                    ok.url,
                    ok.port,
                    ok.status.map(|s| s.to_string()).unwrap_or_else(|| "rendered".into()),
                    ok.latency.as_secs_f64()
                ));
            }
            FetchEvent::AttemptFailed(failure) => {
                log::warn!(
                    "[{}] attempt {} for {} via port {} failed: {}",
                    failure.timestamp.to_rfc3339(),
                    failure.attempt,
                    failure.url,
                    failure
                        .port
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".into()),
                    failure.error
                );
            }
            FetchEvent::ClaimReleased(release) => {
                self.lifecycle(format_args!(
                    "released {} on port {} after {:.2}s (cool-down {:.2}s)",
                    release.hostname,
                    release.port,
                    release.held_for.as_secs_f64(),
                    release.cooldown.as_secs_f64()
                ));
            }
            FetchEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s",
                    retry.url,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64()
                );
            }
            FetchEvent::FallbackTriggered(fallback) => {
                log::info!(
                    "egress block signal from {} on port {}; broadcasting to all ports",
                    fallback.hostname,
                    fallback.trigger_port
                );
            }
            FetchEvent::FallbackCompleted(outcome) => {
                log::info!(
                    "broadcast for {} -> {}/{} ports succeeded",
                    outcome.url,
                    outcome.survivors,
                    outcome.ports
                );
            }
            FetchEvent::Exhausted(exhausted) => {
                log::warn!(
                    "[{}] giving up on {} after {} attempts",
                    exhausted.timestamp.to_rfc3339(),
                    exhausted.url,
                    exhausted.attempts
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::AttemptSucceeded(ok) => {
                self.metrics.record_success(&ok.hostname, ok.port, ok.latency);
            }
            FetchEvent::AttemptFailed(failure) => {
                self.metrics.record_failure(
                    &failure.hostname,
                    failure.port,
                    failure.latency,
                    failure.timeout,
                );
            }
            FetchEvent::FallbackTriggered(fallback) => {
                self.metrics.record_fallback(&fallback.hostname);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &FetchEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.register_handler(Arc::new(LoggingHandler::new(true)));
        dispatcher.dispatch(FetchEvent::AttemptFailed(FailureEvent {
            url: Url::parse("https://shop.example/p/1").unwrap(),
            hostname: "shop.example".into(),
            port: Some(9000),
            attempt: 1,
            error: "timeout".into(),
            timeout: true,
            latency: Duration::from_millis(30),
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }

    #[test]
    fn metrics_handler_records_outcomes() {
        let metrics = MetricsCollector::new();
        let handler = MetricsHandler::new(metrics.clone());
        let url = Url::parse("https://shop.example/").unwrap();
        handler.handle(&FetchEvent::AttemptSucceeded(SuccessEvent {
            url: url.clone(),
            hostname: "shop.example".into(),
            port: 9000,
            attempt: 1,
            status: Some(200),
            latency: Duration::from_millis(120),
            timestamp: Utc::now(),
        }));
        handler.handle(&FetchEvent::FallbackTriggered(FallbackEvent {
            url,
            hostname: "shop.example".into(),
            trigger_port: 9000,
            timestamp: Utc::now(),
        }));
        let snapshot = metrics.snapshot();
        let host = snapshot.host("shop.example").unwrap();
        assert_eq!(host.successes, 1);
        assert_eq!(host.fallbacks, 1);
    }
}
