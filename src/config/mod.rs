//! Settings and configuration module
//!
//! Provides the fetcher configuration with:
//! - Builder-friendly defaults
//! - JSON and environment loading
//! - Fail-fast validation

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::modules::backoff::RetryBackoff;

/// Default tracking/asset hostnames blocked inside rendered pages.
pub const DEFAULT_BLOCKED_HOSTS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "facebook.net",
    "connect.facebook.net",
    "hotjar.com",
    "scorecardresearch.com",
    "adservice.google.com",
    "criteo.com",
    "bat.bing.com",
];

/// Default resource types aborted inside rendered pages, by CDP `ResourceType` name.
pub const DEFAULT_BLOCKED_RESOURCE_TYPES: &[&str] = &["Image", "Font", "Stylesheet"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one proxy port must be configured")]
    NoPorts,
    #[error("proxy port {0} configured more than once")]
    DuplicatePort(u16),
    #[error("proxy port 0 is not a valid egress port")]
    InvalidPort,
    #[error("proxy host must not be empty")]
    MissingProxyHost,
    #[error("proxy credentials are required")]
    MissingCredentials,
    #[error("max tries must be at least 1")]
    InvalidMaxTries,
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("config JSON invalid: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Proxy username/password shared by every port.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl ProxyCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Complete fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub proxy_host: String,
    pub ports: Vec<u16>,
    pub credentials: Option<ProxyCredentials>,
    pub success_delay: Duration,
    pub error_delay: Duration,
    pub max_tries: usize,
    pub verbose: bool,
    pub claim_timeout: Duration,
    pub request_timeout: Duration,
    pub navigation_timeout: Duration,
    pub broadcast_window: Duration,
    pub retry_backoff: RetryBackoff,
    pub block_signatures: Vec<String>,
    pub blocked_hosts: Vec<String>,
    pub blocked_resource_types: Vec<String>,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            proxy_host: String::new(),
            ports: Vec::new(),
            credentials: None,
            success_delay: Duration::from_millis(1000),
            error_delay: Duration::from_millis(3000),
            max_tries: 3,
            verbose: false,
            claim_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(60),
            broadcast_window: Duration::from_secs(10),
            retry_backoff: RetryBackoff::default(),
            block_signatures: Vec::new(),
            blocked_hosts: DEFAULT_BLOCKED_HOSTS.iter().map(|h| h.to_string()).collect(),
            blocked_resource_types: DEFAULT_BLOCKED_RESOURCE_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            chrome_executable: None,
        }
    }
}

impl FetcherConfig {
    /// Rejects configurations that would only fail at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        let mut seen = HashSet::new();
        for &port in &self.ports {
            if port == 0 {
                return Err(ConfigError::InvalidPort);
            }
            if !seen.insert(port) {
                return Err(ConfigError::DuplicatePort(port));
            }
        }
        if self.proxy_host.trim().is_empty() {
            return Err(ConfigError::MissingProxyHost);
        }
        match self.credentials {
            Some(ref creds) if !creds.username.is_empty() => {}
            _ => return Err(ConfigError::MissingCredentials),
        }
        if self.max_tries == 0 {
            return Err(ConfigError::InvalidMaxTries);
        }
        Ok(())
    }

    /// Proxy URL (without credentials) for one port.
    pub fn proxy_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.proxy_host, port)
    }

    /// Parse a JSON document. Durations are expressed in milliseconds.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(raw)?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Load the required settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::MissingEnv(name));

        let ports = required("PROXY_PORTS")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                    name: "PROXY_PORTS",
                    value: s.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let millis = |name: &'static str| -> Result<Duration, ConfigError> {
            let value = required(name)?;
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue { name, value })
        };

        let max_tries_raw = required("MAX_TRIES")?;
        let max_tries = max_tries_raw
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue {
                name: "MAX_TRIES",
                value: max_tries_raw.clone(),
            })?;

        let verbose = lookup("VERBOSE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let config = Self {
            proxy_host: required("PROXY_HOST")?,
            ports,
            credentials: Some(ProxyCredentials::new(
                required("PROXY_USERNAME")?,
                required("PROXY_PASSWORD")?,
            )),
            success_delay: millis("SAME_HOSTNAME_SUCCESS_DELAY_MS")?,
            error_delay: millis("SAME_HOSTNAME_ERROR_DELAY_MS")?,
            max_tries,
            verbose,
            chrome_executable: lookup("CHROME_EXECUTABLE").map(PathBuf::from),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// On-disk representation used by [`FetcherConfig::from_json`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    proxy_host: String,
    ports: Vec<u16>,
    credentials: ProxyCredentials,
    same_hostname_success_delay_ms: u64,
    same_hostname_error_delay_ms: u64,
    max_tries: usize,
    #[serde(default)]
    verbose: bool,
    claim_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    navigation_timeout_ms: Option<u64>,
    broadcast_window_ms: Option<u64>,
    #[serde(default)]
    block_signatures: Vec<String>,
    blocked_hosts: Option<Vec<String>>,
    blocked_resource_types: Option<Vec<String>>,
    chrome_executable: Option<PathBuf>,
}

impl ConfigFile {
    fn into_config(self) -> FetcherConfig {
        let defaults = FetcherConfig::default();
        let or_default = |ms: Option<u64>, fallback: Duration| {
            ms.map(Duration::from_millis).unwrap_or(fallback)
        };
        FetcherConfig {
            proxy_host: self.proxy_host,
            ports: self.ports,
            credentials: Some(self.credentials),
            success_delay: Duration::from_millis(self.same_hostname_success_delay_ms),
            error_delay: Duration::from_millis(self.same_hostname_error_delay_ms),
            max_tries: self.max_tries,
            verbose: self.verbose,
            claim_timeout: or_default(self.claim_timeout_ms, defaults.claim_timeout),
            request_timeout: or_default(self.request_timeout_ms, defaults.request_timeout),
            navigation_timeout: or_default(self.navigation_timeout_ms, defaults.navigation_timeout),
            broadcast_window: or_default(self.broadcast_window_ms, defaults.broadcast_window),
            retry_backoff: defaults.retry_backoff,
            block_signatures: self.block_signatures,
            blocked_hosts: self.blocked_hosts.unwrap_or(defaults.blocked_hosts),
            blocked_resource_types: self
                .blocked_resource_types
                .unwrap_or(defaults.blocked_resource_types),
            chrome_executable: self.chrome_executable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> FetcherConfig {
        FetcherConfig {
            proxy_host: "proxy.local".into(),
            ports: vec![10001, 10002],
            credentials: Some(ProxyCredentials::new("user", "secret")),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_missing_ports_and_credentials() {
        let mut config = valid();
        config.ports.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoPorts)));

        let mut config = valid();
        config.credentials = None;
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredentials)));

        let mut config = valid();
        config.ports.push(10001);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicatePort(10001))));

        let mut config = valid();
        config.max_tries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMaxTries)));
    }

    #[test]
    fn parses_json_with_millisecond_durations() {
        let raw = r#"{
            "proxyHost": "gate.example.net",
            "ports": [7000, 7001, 7002],
            "credentials": { "username": "u", "password": "p" },
            "sameHostnameSuccessDelayMs": 1500,
            "sameHostnameErrorDelayMs": 250,
            "maxTries": 4,
            "verbose": true,
            "blockSignatures": ["{\"error\":\"Could not find product\"}"],
            "blockedResourceTypes": ["Image", "Media"]
        }"#;
        let config = FetcherConfig::from_json(raw).unwrap();
        assert_eq!(config.ports, vec![7000, 7001, 7002]);
        assert_eq!(config.success_delay, Duration::from_millis(1500));
        assert_eq!(config.error_delay, Duration::from_millis(250));
        assert_eq!(config.max_tries, 4);
        assert!(config.verbose);
        assert_eq!(config.block_signatures.len(), 1);
        assert_eq!(config.blocked_resource_types, vec!["Image", "Media"]);
        assert_eq!(config.broadcast_window, Duration::from_secs(10));
        assert_eq!(config.proxy_url(7001), "http://gate.example.net:7001");
    }

    #[test]
    fn loads_from_environment_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PROXY_HOST", "gate.example.net"),
            ("PROXY_PORTS", "8001, 8002"),
            ("PROXY_USERNAME", "user"),
            ("PROXY_PASSWORD", "pass"),
            ("SAME_HOSTNAME_SUCCESS_DELAY_MS", "2000"),
            ("SAME_HOSTNAME_ERROR_DELAY_MS", "500"),
            ("MAX_TRIES", "5"),
            ("VERBOSE", "true"),
        ]);
        let config =
            FetcherConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.ports, vec![8001, 8002]);
        assert_eq!(config.max_tries, 5);
        assert!(config.verbose);

        let err = FetcherConfig::from_lookup(|key| {
            (key != "PROXY_PASSWORD")
                .then(|| env.get(key).map(|v| v.to_string()))
                .flatten()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("PROXY_PASSWORD")));
    }

    #[test]
    fn debug_output_redacts_password() {
        let creds = ProxyCredentials::new("user", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }
}
