//! Metrics collection utilities.
//!
//! Aggregates attempt outcomes globally, per hostname and per egress port,
//! with rolling latency percentiles.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters for one key (global, a hostname, or a port).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub fallbacks: u64,
    pub consecutive_failures: u32,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl OutcomeStats {
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64)
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub global: OutcomeStats,
    pub hosts: HashMap<String, OutcomeStats>,
    pub ports: HashMap<u16, OutcomeStats>,
}

impl MetricsSnapshot {
    pub fn host(&self, hostname: &str) -> Option<&OutcomeStats> {
        self.hosts.get(hostname)
    }

    pub fn port(&self, port: u16) -> Option<&OutcomeStats> {
        self.ports.get(&port)
    }
}

#[derive(Debug)]
struct Accumulator {
    stats: OutcomeStats,
    latencies: VecDeque<Duration>,
    max_window: usize,
}

impl Accumulator {
    fn new(max_window: usize) -> Self {
        Self {
            stats: OutcomeStats::default(),
            latencies: VecDeque::with_capacity(max_window),
            max_window,
        }
    }

    fn record(&mut self, success: bool, timeout: bool, latency: Duration) {
        self.stats.attempts += 1;
        if success {
            self.stats.successes += 1;
            self.stats.consecutive_failures = 0;
        } else {
            self.stats.failures += 1;
            self.stats.consecutive_failures = self.stats.consecutive_failures.saturating_add(1);
        }
        if timeout {
            self.stats.timeouts += 1;
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn snapshot(&self) -> OutcomeStats {
        let (avg, p95) = latency_stats(&self.latencies);
        OutcomeStats {
            average_latency: avg,
            p95_latency: p95,
            ..self.stats.clone()
        }
    }
}

fn latency_stats(latencies: &VecDeque<Duration>) -> (Option<Duration>, Option<Duration>) {
    if latencies.is_empty() {
        return (None, None);
    }
    let mut samples: Vec<_> = latencies.iter().copied().collect();
    samples.sort_unstable();
    let total: Duration = samples.iter().sum();
    let avg = total / samples.len() as u32;
    let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    (Some(avg), Some(samples[p95_index]))
}

#[derive(Debug)]
struct MetricsState {
    started_at: DateTime<Utc>,
    max_window: usize,
    global: Accumulator,
    hosts: HashMap<String, Accumulator>,
    ports: HashMap<u16, Accumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            started_at: Utc::now(),
            max_window,
            global: Accumulator::new(max_window),
            hosts: HashMap::new(),
            ports: HashMap::new(),
        }
    }

    fn host_mut(&mut self, hostname: &str) -> &mut Accumulator {
        let window = self.max_window;
        self.hosts
            .entry(hostname.to_string())
            .or_insert_with(|| Accumulator::new(window))
    }

    fn port_mut(&mut self, port: u16) -> &mut Accumulator {
        let window = self.max_window;
        self.ports
            .entry(port)
            .or_insert_with(|| Accumulator::new(window))
    }

    fn record(&mut self, hostname: &str, port: Option<u16>, success: bool, timeout: bool, latency: Duration) {
        self.global.record(success, timeout, latency);
        self.host_mut(hostname).record(success, timeout, latency);
        if let Some(port) = port {
            self.port_mut(port).record(success, timeout, latency);
        }
    }
}

/// Thread-safe metrics collector shared by the fetcher and its handlers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(128)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_success(&self, hostname: &str, port: u16, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.record(hostname, Some(port), true, false, latency);
    }

    /// `port` is `None` when the attempt never got a port.
    pub fn record_failure(&self, hostname: &str, port: Option<u16>, latency: Duration, timeout: bool) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.record(hostname, port, false, timeout, latency);
    }

    pub fn record_fallback(&self, hostname: &str) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.stats.fallbacks += 1;
        guard.host_mut(hostname).stats.fallbacks += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        MetricsSnapshot {
            started_at: guard.started_at,
            global: guard.global.snapshot(),
            hosts: guard
                .hosts
                .iter()
                .map(|(host, acc)| (host.clone(), acc.snapshot()))
                .collect(),
            ports: guard
                .ports
                .iter()
                .map(|(port, acc)| (*port, acc.snapshot()))
                .collect(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
