//! # rotofetch-rs
//!
//! Rotating-proxy fetch scheduler. Spreads requests for any target hostname
//! across a pool of egress proxy ports so that no port serves the same
//! hostname twice at once, and every port rests after each request.
//!
//! ## Features
//!
//! - Per-hostname concurrency gates sized to the port pool
//! - Exclusive (port, hostname) claims with success and error cool-downs
//! - Plain proxied HTTP via reqwest and rendered fetches via Chromium
//! - Retries with exponential backoff up to a configured budget
//! - Broadcast fallback across all ports when a target blocks an egress IP
//! - Browser-like header identities
//!
//! ## Example
//!
//! ```no_run
//! use rotofetch_rs::{FetchOptions, ProxyFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = ProxyFetcher::builder()
//!         .with_proxy_host("proxy.internal")
//!         .with_ports([10001, 10002, 10003])
//!         .with_credentials("user", "secret")
//!         .build()?;
//!
//!     let response = fetcher.get("https://example.com").await?;
//!     println!("{}: {}", response.status(), response.text());
//!
//!     let html = fetcher
//!         .fetch("https://example.com", FetchOptions::browser().wait_for_network_idle())
//!         .await?
//!         .text();
//!     println!("{html}");
//!
//!     fetcher.close().await;
//!     Ok(())
//! }
//! ```

mod fetcher;

pub mod backends;
pub mod config;
pub mod modules;

pub use crate::fetcher::{FetchError, FetchResult, LoadReport, ProxyFetcher, ProxyFetcherBuilder};

pub use crate::backends::{
    BackendError,
    BackendRequest,
    ChromiumBackend,
    FetchBackend,
    FetchMethod,
    FetchOptions,
    FetchPayload,
    FetchResponse,
    ReqwestBackend,
    WaitUntil,
};

pub use crate::config::{ConfigError, FetcherConfig, ProxyCredentials};

pub use crate::modules::{
    BrowserType,
    EventDispatcher,
    EventHandler,
    FetchEvent,
    HeaderIdentityGenerator,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    OutcomeStats,
    PortError,
    ResponseClassifier,
    RetryBackoff,
    SignatureClassifier,
    Verdict,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
