//! Fetch scheduling over a pool of egress ports.
//!
//! Wires the hostname gates, the port pool, the execution backends and the
//! response classifier into a single entry point. Every attempt holds one
//! gate permit and one (port, hostname) claim; both are released after a
//! cool-down that depends on the outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{Instant, sleep};
use url::Url;

use crate::backends::{
	BackendError, BackendRequest, ChromiumBackend, FetchBackend, FetchMethod, FetchOptions,
	FetchPayload, FetchResponse, ReqwestBackend,
};
use crate::config::{ConfigError, FetcherConfig, ProxyCredentials};
use crate::modules::backoff::RetryBackoff;
use crate::modules::broadcast::{PortOutcome, broadcast, pick_survivor};
use crate::modules::classifier::{ResponseClassifier, SignatureClassifier, Verdict};
use crate::modules::events::{
	AttemptEvent, EventDispatcher, EventHandler, ExhaustedEvent, FailureEvent, FallbackEvent,
	FallbackOutcomeEvent, FetchEvent, LoggingHandler, MetricsHandler, ReleaseEvent, RetryEvent,
	SuccessEvent,
};
use crate::modules::gates::HostnameGates;
use crate::modules::identity::HeaderIdentityGenerator;
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::modules::ports::{PortClaim, PortError, PortPool};

/// Result alias used across the scheduling layer.
pub type FetchResult<T> = Result<T, FetchError>;

/// Error surfaced by [`ProxyFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
	#[error("max tries ({attempts}) exceeded for {url} at {at}")]
	MaxTriesExceeded {
		url: Url,
		at: DateTime<Utc>,
		attempts: usize,
		last_error: Option<Box<FetchError>>,
	},
	#[error("no valid responses for {url} from any port")]
	NoValidResponses { url: Url },
	#[error("backend error: {0}")]
	Backend(#[from] BackendError),
	#[error("port error: {0}")]
	Port(#[from] PortError),
	#[error("response rejected: {0}")]
	Rejected(String),
	#[error("egress blocked on port {0}")]
	Blocked(u16),
	#[error("url has no hostname: {0}")]
	MissingHost(Url),
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("no backend configured for {0}")]
	BackendUnavailable(FetchMethod),
	#[error("fetcher is closed")]
	Closed,
}

impl FetchError {
	/// Whether the terminal failure was a timeout (request, navigation, or port wait).
	pub fn is_timeout(&self) -> bool {
		match self {
			FetchError::Backend(err) => err.is_timeout(),
			FetchError::Port(PortError::ClaimTimeout { .. }) => true,
			FetchError::MaxTriesExceeded {
				last_error: Some(last),
				..
			} => last.is_timeout(),
			_ => false,
		}
	}

	/// The last attempt's error, for terminal failures that carry one.
	pub fn last_error(&self) -> Option<&FetchError> {
		match self {
			FetchError::MaxTriesExceeded { last_error, .. } => last_error.as_deref(),
			_ => None,
		}
	}
}

/// Snapshot of pool occupancy for load-balancer publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
	pub busy_ports: usize,
	pub total_ports: usize,
	pub live_claims: usize,
	pub tracked_hosts: usize,
	/// 1 (saturated) to 100 (idle).
	pub weight: u8,
}

impl LoadReport {
	fn compute(busy_ports: usize, total_ports: usize, live_claims: usize, tracked_hosts: usize) -> Self {
		let free = total_ports.saturating_sub(busy_ports);
		let weight = if total_ports == 0 {
			1
		} else {
			1 + (99 * free / total_ports) as u8
		};
		Self {
			busy_ports,
			total_ports,
			live_claims,
			tracked_hosts,
			weight,
		}
	}
}

/// Fluent builder for [`ProxyFetcher`].
pub struct ProxyFetcherBuilder {
	config: FetcherConfig,
	http: Option<Arc<dyn FetchBackend>>,
	browser: Option<Arc<dyn FetchBackend>>,
	enable_browser: bool,
	classifier: Option<Arc<dyn ResponseClassifier>>,
	handlers: Vec<Arc<dyn EventHandler>>,
	identity: HeaderIdentityGenerator,
}

impl ProxyFetcherBuilder {
	pub fn new() -> Self {
		Self::from_config(FetcherConfig::default())
	}

	/// Starts from an existing configuration (for example [`FetcherConfig::from_env`]).
	pub fn from_config(config: FetcherConfig) -> Self {
		Self {
			config,
			http: None,
			browser: None,
			enable_browser: true,
			classifier: None,
			handlers: Vec::new(),
			identity: HeaderIdentityGenerator::default(),
		}
	}

	pub fn with_proxy_host(mut self, host: impl Into<String>) -> Self {
		self.config.proxy_host = host.into();
		self
	}

	pub fn with_ports<I>(mut self, ports: I) -> Self
	where
		I: IntoIterator<Item = u16>,
	{
		self.config.ports = ports.into_iter().collect();
		self
	}

	pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
		self.config.credentials = Some(ProxyCredentials::new(username, password));
		self
	}

	pub fn with_success_delay(mut self, delay: Duration) -> Self {
		self.config.success_delay = delay;
		self
	}

	pub fn with_error_delay(mut self, delay: Duration) -> Self {
		self.config.error_delay = delay;
		self
	}

	pub fn with_max_tries(mut self, max_tries: usize) -> Self {
		self.config.max_tries = max_tries;
		self
	}

	pub fn verbose(mut self, verbose: bool) -> Self {
		self.config.verbose = verbose;
		self
	}

	pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
		self.config.claim_timeout = timeout;
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
		self.config.navigation_timeout = timeout;
		self
	}

	pub fn with_broadcast_window(mut self, window: Duration) -> Self {
		self.config.broadcast_window = window;
		self
	}

	pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
		self.config.retry_backoff = backoff;
		self
	}

	pub fn with_block_signatures<I, S>(mut self, signatures: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.config.block_signatures = signatures.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_chrome_executable(mut self, path: impl Into<std::path::PathBuf>) -> Self {
		self.config.chrome_executable = Some(path.into());
		self
	}

	/// Replaces the plain HTTP backend serving `GET` and `POST`.
	pub fn with_http_backend(mut self, backend: Arc<dyn FetchBackend>) -> Self {
		self.http = Some(backend);
		self
	}

	/// Replaces the rendering backend serving `BROWSER`.
	pub fn with_browser_backend(mut self, backend: Arc<dyn FetchBackend>) -> Self {
		self.browser = Some(backend);
		self.enable_browser = true;
		self
	}

	/// Builds without a rendering backend; `BROWSER` fetches fail fast.
	pub fn disable_browser(mut self) -> Self {
		self.browser = None;
		self.enable_browser = false;
		self
	}

	pub fn with_classifier(mut self, classifier: Arc<dyn ResponseClassifier>) -> Self {
		self.classifier = Some(classifier);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn with_identity(mut self, identity: HeaderIdentityGenerator) -> Self {
		self.identity = identity;
		self
	}

	/// Validates the configuration and assembles the fetcher.
	///
	/// Rendering sessions are not launched here; see [`ProxyFetcher::open`].
	pub fn build(self) -> FetchResult<ProxyFetcher> {
		let config = self.config;
		config.validate()?;

		let http = match self.http {
			Some(backend) => backend,
			None => Arc::new(ReqwestBackend::new(&config)?) as Arc<dyn FetchBackend>,
		};
		let browser = match (self.browser, self.enable_browser) {
			(Some(backend), _) => Some(backend),
			(None, true) => Some(Arc::new(ChromiumBackend::new(&config)) as Arc<dyn FetchBackend>),
			(None, false) => None,
		};
		let classifier = self.classifier.unwrap_or_else(|| {
			Arc::new(SignatureClassifier::new(config.block_signatures.clone()))
		});

		let metrics = MetricsCollector::new();
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler::new(config.verbose)));
		events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
		for handler in self.handlers {
			events.register_handler(handler);
		}

		let ports = PortPool::new(&config.ports);
		let gates = HostnameGates::new(ports.len());

		Ok(ProxyFetcher {
			inner: Arc::new(FetcherInner {
				config,
				ports,
				gates,
				http,
				browser,
				classifier,
				identity: self.identity,
				events: Arc::new(events),
				metrics,
				closed: AtomicBool::new(false),
			}),
		})
	}
}

impl Default for ProxyFetcherBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct FetcherInner {
	config: FetcherConfig,
	ports: PortPool,
	gates: HostnameGates,
	http: Arc<dyn FetchBackend>,
	browser: Option<Arc<dyn FetchBackend>>,
	classifier: Arc<dyn ResponseClassifier>,
	identity: HeaderIdentityGenerator,
	events: Arc<EventDispatcher>,
	metrics: MetricsCollector,
	closed: AtomicBool,
}

/// A claim and its gate permit, released together after a cool-down.
struct Lease {
	claim: PortClaim,
	permit: Option<OwnedSemaphorePermit>,
}

/// What a single scheduled attempt produced.
enum AttemptOutcome {
	Accepted(FetchPayload),
	Blocked { port: u16 },
	Failed(FetchError),
}

/// Everything a fetch needs, shared between its attempts and broadcast tasks.
#[derive(Clone)]
struct FetchPlan {
	url: Url,
	hostname: String,
	options: FetchOptions,
	backend: Arc<dyn FetchBackend>,
}

/// Rotating-proxy fetcher. Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct ProxyFetcher {
	inner: Arc<FetcherInner>,
}

impl ProxyFetcher {
	pub fn builder() -> ProxyFetcherBuilder {
		ProxyFetcherBuilder::new()
	}

	/// Builds a fetcher from environment variables.
	pub fn from_env() -> FetchResult<Self> {
		ProxyFetcherBuilder::from_config(FetcherConfig::from_env()?).build()
	}

	pub fn config(&self) -> &FetcherConfig {
		&self.inner.config
	}

	/// Warms up every backend for every port.
	pub async fn open(&self) -> FetchResult<()> {
		self.ensure_open()?;
		let ports = self.inner.ports.numbers();
		self.inner.http.open(&ports).await?;
		if let Some(ref browser) = self.inner.browser {
			browser.open(&ports).await?;
		}
		if self.inner.config.verbose {
			log::info!("fetcher open with {} ports", ports.len());
		} else {
			log::debug!("fetcher open with {} ports", ports.len());
		}
		Ok(())
	}

	/// Stops accepting fetches and shuts backends down. Idempotent.
	pub async fn close(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.inner.gates.close();
		self.inner.http.close().await;
		if let Some(ref browser) = self.inner.browser {
			browser.close().await;
		}
		log::debug!("fetcher closed");
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Plain proxied GET.
	pub async fn get(&self, url: &str) -> FetchResult<FetchResponse> {
		self.fetch(url, FetchOptions::get())
			.await
			.and_then(|payload| expect_response(payload, FetchMethod::Get))
	}

	/// Plain proxied POST.
	pub async fn post(&self, url: &str, body: impl Into<Bytes>) -> FetchResult<FetchResponse> {
		self.fetch(url, FetchOptions::post(body))
			.await
			.and_then(|payload| expect_response(payload, FetchMethod::Post))
	}

	/// Rendered fetch returning the document text.
	pub async fn render(&self, url: &str) -> FetchResult<String> {
		self.fetch(url, FetchOptions::browser())
			.await
			.map(|payload| payload.text())
	}

	/// Fetches `url` through the pool.
	pub async fn fetch(&self, url: &str, options: FetchOptions) -> FetchResult<FetchPayload> {
		self.fetch_url(Url::parse(url)?, options).await
	}

	pub async fn fetch_url(&self, url: Url, options: FetchOptions) -> FetchResult<FetchPayload> {
		self.ensure_open()?;
		let hostname = url
			.host_str()
			.ok_or_else(|| FetchError::MissingHost(url.clone()))?
			.to_string();
		let backend = self.backend_for(options.method)?;
		let plan = FetchPlan {
			url,
			hostname,
			options,
			backend,
		};

		let max_tries = self.inner.config.max_tries;
		let mut attempt = 0usize;
		let mut last_error: Option<FetchError> = None;

		loop {
			if attempt >= max_tries {
				let at = Utc::now();
				self.inner.events.dispatch(FetchEvent::Exhausted(ExhaustedEvent {
					url: plan.url.clone(),
					hostname: plan.hostname.clone(),
					attempts: attempt,
					timestamp: at,
				}));
				return Err(FetchError::MaxTriesExceeded {
					url: plan.url,
					at,
					attempts: attempt,
					last_error: last_error.map(Box::new),
				});
			}
			attempt += 1;

			match self.attempt(&plan, attempt).await? {
				AttemptOutcome::Accepted(payload) => return Ok(payload),
				AttemptOutcome::Blocked { port } => {
					return self.broadcast_fallback(&plan, port, attempt).await;
				}
				AttemptOutcome::Failed(err) => {
					last_error = Some(err);
					if attempt < max_tries {
						let delay = self.inner.config.retry_backoff.delay_for(attempt);
						self.inner.events.dispatch(FetchEvent::Retry(RetryEvent {
							url: plan.url.clone(),
							attempt: attempt + 1,
							scheduled_after: delay,
							timestamp: Utc::now(),
						}));
						if !delay.is_zero() {
							sleep(delay).await;
						}
					}
				}
			}
		}
	}

	/// Collected metrics.
	pub fn metrics(&self) -> MetricsSnapshot {
		self.inner.metrics.snapshot()
	}

	/// Current pool occupancy.
	pub fn load(&self) -> LoadReport {
		LoadReport::compute(
			self.inner.ports.busy_ports(),
			self.inner.ports.len(),
			self.inner.ports.live_claims(),
			self.inner.gates.tracked_hosts(),
		)
	}

	/// Attempts currently holding a gate permit for `hostname`.
	pub fn in_flight(&self, hostname: &str) -> usize {
		self.inner.gates.in_flight(hostname)
	}

	fn ensure_open(&self) -> FetchResult<()> {
		if self.is_closed() {
			return Err(FetchError::Closed);
		}
		Ok(())
	}

	fn backend_for(&self, method: FetchMethod) -> FetchResult<Arc<dyn FetchBackend>> {
		if method.is_rendered() {
			self.inner
				.browser
				.clone()
				.ok_or(FetchError::BackendUnavailable(method))
		} else {
			Ok(self.inner.http.clone())
		}
	}

	/// One gated, claimed attempt. `Err` is terminal; attempt failures come
	/// back as [`AttemptOutcome::Failed`].
	async fn attempt(&self, plan: &FetchPlan, attempt: usize) -> FetchResult<AttemptOutcome> {
		let permit = self
			.inner
			.gates
			.acquire(&plan.hostname)
			.await
			.map_err(|_| FetchError::Closed)?;

		let waiting = Instant::now();
		let claim = match self
			.inner
			.ports
			.claim(&plan.hostname, self.inner.config.claim_timeout)
			.await
		{
			Ok(claim) => claim,
			Err(err) => {
				drop(permit);
				let err = FetchError::from(err);
				self.report_failure(plan, None, attempt, &err, waiting.elapsed());
				return Ok(AttemptOutcome::Failed(err));
			}
		};
		let port = claim.port();
		let lease = Lease {
			claim,
			permit: Some(permit),
		};

		self.inner.events.dispatch(FetchEvent::AttemptStarted(AttemptEvent {
			url: plan.url.clone(),
			hostname: plan.hostname.clone(),
			port,
			attempt,
			method: plan.options.method,
			timestamp: Utc::now(),
		}));

		let started = Instant::now();
		let result = self.execute_on(plan, port).await;
		let latency = started.elapsed();

		match result {
			Ok(payload) => match self.inner.classifier.classify(&payload) {
				Verdict::Accept => {
					self.schedule_release(lease, self.inner.config.success_delay);
					self.inner.events.dispatch(FetchEvent::AttemptSucceeded(SuccessEvent {
						url: plan.url.clone(),
						hostname: plan.hostname.clone(),
						port,
						attempt,
						status: payload.status(),
						latency,
						timestamp: Utc::now(),
					}));
					Ok(AttemptOutcome::Accepted(payload))
				}
				Verdict::Blocked => {
					self.schedule_release(lease, self.inner.config.error_delay);
					self.report_failure(plan, Some(port), attempt, &FetchError::Blocked(port), latency);
					Ok(AttemptOutcome::Blocked { port })
				}
				Verdict::Reject(reason) => {
					self.schedule_release(lease, self.inner.config.error_delay);
					let err = FetchError::Rejected(reason);
					self.report_failure(plan, Some(port), attempt, &err, latency);
					Ok(AttemptOutcome::Failed(err))
				}
			},
			Err(err) => {
				self.schedule_release(lease, self.inner.config.error_delay);
				let err = FetchError::Backend(err);
				self.report_failure(plan, Some(port), attempt, &err, latency);
				Ok(AttemptOutcome::Failed(err))
			}
		}
	}

	async fn execute_on(&self, plan: &FetchPlan, port: u16) -> Result<FetchPayload, BackendError> {
		let headers: HeaderMap = self.inner.identity.merge(&plan.options.headers);
		plan.backend
			.execute(BackendRequest {
				url: &plan.url,
				port,
				method: plan.options.method,
				headers: &headers,
				body: plan.options.body.as_ref(),
				wait_until: plan.options.wait_until,
			})
			.await
	}

	/// Sends the request through every port and returns a random survivor.
	///
	/// Each port task claims its own (port, hostname) pair within the window,
	/// so the claim invariant holds during the fan-out. Hostname gates are
	/// not consulted. Per-port events carry the triggering attempt number.
	async fn broadcast_fallback(
		&self,
		plan: &FetchPlan,
		trigger_port: u16,
		attempt: usize,
	) -> FetchResult<FetchPayload> {
		self.inner.events.dispatch(FetchEvent::FallbackTriggered(FallbackEvent {
			url: plan.url.clone(),
			hostname: plan.hostname.clone(),
			trigger_port,
			timestamp: Utc::now(),
		}));

		let window = self.inner.config.broadcast_window;
		let deadline = Instant::now() + window;
		let ports = self.inner.ports.numbers();

		let outcomes = broadcast(&ports, window, |port| {
			let this = self.clone();
			let plan = plan.clone();
			async move { this.broadcast_attempt(&plan, port, attempt, deadline).await }
		})
		.await;

		for (port, outcome) in &outcomes {
			match outcome {
				// Still running; it reports its own outcome when it settles.
				PortOutcome::Unsettled => {
					log::debug!("broadcast on port {port} for {} outlived the window", plan.url);
				}
				PortOutcome::Aborted(reason) => {
					log::warn!("broadcast on port {port} for {} aborted: {reason}", plan.url);
				}
				PortOutcome::Settled(_) => {}
			}
		}

		let survivors = outcomes
			.iter()
			.filter(|(_, outcome)| matches!(outcome, PortOutcome::Settled(Ok(_))))
			.count();
		let chosen = pick_survivor(outcomes);

		self.inner.events.dispatch(FetchEvent::FallbackCompleted(FallbackOutcomeEvent {
			url: plan.url.clone(),
			hostname: plan.hostname.clone(),
			ports: ports.len(),
			survivors,
			chosen_port: chosen.as_ref().map(|(port, _)| *port),
			timestamp: Utc::now(),
		}));

		match chosen {
			Some((_, payload)) => Ok(payload),
			None => Err(FetchError::NoValidResponses {
				url: plan.url.clone(),
			}),
		}
	}

	async fn broadcast_attempt(
		&self,
		plan: &FetchPlan,
		port: u16,
		attempt: usize,
		deadline: Instant,
	) -> FetchResult<FetchPayload> {
		let waiting = Instant::now();
		let remaining = deadline.saturating_duration_since(waiting);
		let claim = match self.inner.ports.claim_port(port, &plan.hostname, remaining).await {
			Ok(claim) => claim,
			Err(err) => {
				let err = FetchError::from(err);
				self.report_failure(plan, Some(port), attempt, &err, waiting.elapsed());
				return Err(err);
			}
		};
		let lease = Lease { claim, permit: None };

		self.inner.events.dispatch(FetchEvent::AttemptStarted(AttemptEvent {
			url: plan.url.clone(),
			hostname: plan.hostname.clone(),
			port,
			attempt,
			method: plan.options.method,
			timestamp: Utc::now(),
		}));

		let config = &self.inner.config;
		let started = Instant::now();
		let result = self.execute_on(plan, port).await;
		let latency = started.elapsed();
		let (cooldown, outcome) = match result {
			Ok(payload) => match self.inner.classifier.classify(&payload) {
				Verdict::Accept => (config.success_delay, Ok(payload)),
				Verdict::Blocked => (config.error_delay, Err(FetchError::Blocked(port))),
				Verdict::Reject(reason) => (config.error_delay, Err(FetchError::Rejected(reason))),
			},
			Err(err) => (config.error_delay, Err(FetchError::Backend(err))),
		};
		self.schedule_release(lease, cooldown);

		match outcome {
			Ok(ref payload) => {
				self.inner.events.dispatch(FetchEvent::AttemptSucceeded(SuccessEvent {
					url: plan.url.clone(),
					hostname: plan.hostname.clone(),
					port,
					attempt,
					status: payload.status(),
					latency,
					timestamp: Utc::now(),
				}));
			}
			Err(ref err) => self.report_failure(plan, Some(port), attempt, err, latency),
		}
		outcome
	}

	/// Releases the lease after `cooldown` without blocking the caller.
	fn schedule_release(&self, lease: Lease, cooldown: Duration) {
		let events = self.inner.events.clone();
		tokio::spawn(async move {
			if !cooldown.is_zero() {
				sleep(cooldown).await;
			}
			let Lease { claim, permit } = lease;
			let event = ReleaseEvent {
				hostname: claim.hostname().to_string(),
				port: claim.port(),
				cooldown,
				held_for: claim.held_for(),
				timestamp: Utc::now(),
			};
			drop(claim);
			drop(permit);
			events.dispatch(FetchEvent::ClaimReleased(event));
		});
	}

	fn report_failure(&self, plan: &FetchPlan, port: Option<u16>, attempt: usize, err: &FetchError, latency: Duration) {
		self.inner.events.dispatch(FetchEvent::AttemptFailed(FailureEvent {
			url: plan.url.clone(),
			hostname: plan.hostname.clone(),
			port,
			attempt,
			error: err.to_string(),
			timeout: err.is_timeout(),
			latency,
			timestamp: Utc::now(),
		}));
	}
}

fn expect_response(payload: FetchPayload, method: FetchMethod) -> FetchResult<FetchResponse> {
	payload.into_response().ok_or(FetchError::BackendUnavailable(method))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn load_weight_tracks_spare_capacity() {
		assert_eq!(LoadReport::compute(0, 4, 0, 0).weight, 100);
		assert_eq!(LoadReport::compute(2, 4, 3, 1).weight, 50);
		assert_eq!(LoadReport::compute(4, 4, 9, 2).weight, 1);
		assert_eq!(LoadReport::compute(0, 0, 0, 0).weight, 1);
	}

	#[test]
	fn timeout_detection_follows_the_last_error() {
		let url = Url::parse("https://shop.example/").unwrap();
		let err = FetchError::MaxTriesExceeded {
			url: url.clone(),
			at: Utc::now(),
			attempts: 3,
			last_error: Some(Box::new(FetchError::Backend(BackendError::Timeout(
				Duration::from_secs(30),
			)))),
		};
		assert!(err.is_timeout());
		assert!(err.last_error().is_some());

		let claim = FetchError::Port(PortError::ClaimTimeout {
			hostname: "shop.example".into(),
			waited: Duration::from_secs(60),
		});
		assert!(claim.is_timeout());
		assert!(!FetchError::NoValidResponses { url }.is_timeout());
	}

	#[test]
	fn build_rejects_invalid_config() {
		let result = ProxyFetcher::builder().with_proxy_host("proxy.local").build();
		assert!(matches!(result, Err(FetchError::Config(ConfigError::NoPorts))));
	}
}
