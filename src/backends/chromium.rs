//! Rendered fetches through one persistent Chromium instance per port.
//!
//! Each browser is launched with `--proxy-server` pointing at its port and
//! lives until the backend is closed or its health check fails.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::auth::Credentials;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, Headers, LoaderId, ResourceType, SetBlockedUrLsParams, SetExtraHttpHeadersParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, FrameId, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use http::HeaderMap;
use http::header::{ACCEPT_ENCODING, HOST, USER_AGENT};
use tokio::task::JoinHandle;

use super::session::{ManagedSession, SessionSlot};
use super::{BackendError, BackendRequest, FetchBackend, FetchMethod, FetchPayload, WaitUntil};
use crate::config::{FetcherConfig, ProxyCredentials};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const DOM_CONTENT_LOADED: &str = "DOMContentLoaded";
const NETWORK_IDLE: &str = "networkIdle";

/// Launch and navigation settings shared by every port.
#[derive(Debug, Clone)]
struct RenderSettings {
    proxy_host: String,
    credentials: Option<ProxyCredentials>,
    chrome_executable: Option<PathBuf>,
    navigation_timeout: Duration,
    blocked_patterns: Vec<String>,
    blocked_types: Arc<[ResourceType]>,
    verbose: bool,
}

/// One launched browser and the task draining its CDP event stream.
pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

#[async_trait]
impl ManagedSession for ChromiumSession {
    async fn is_alive(&self) -> bool {
        if self.handler.is_finished() {
            return false;
        }
        matches!(
            tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.browser.version()).await,
            Ok(Ok(_))
        )
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.browser.close().await {
            log::debug!("browser close error: {err}");
        }
        self.handler.abort();
    }

    fn abandon(&self) {
        self.handler.abort();
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // The browser process itself is killed when `Browser` drops.
        self.handler.abort();
    }
}

/// Lifecycle milestone a navigation waits for.
#[derive(Debug, Clone, PartialEq)]
struct NavigationTarget {
    frame_id: FrameId,
    loader_id: Option<LoaderId>,
    event: &'static str,
}

impl NavigationTarget {
    fn new(wait_until: WaitUntil, frame_id: FrameId, loader_id: Option<LoaderId>) -> Self {
        let event = match wait_until {
            WaitUntil::DomReady => DOM_CONTENT_LOADED,
            WaitUntil::NetworkIdle => NETWORK_IDLE,
        };
        Self {
            frame_id,
            loader_id,
            event,
        }
    }

    /// Only the navigated frame counts, and only for the loader this navigation started.
    /// Same-document navigations report no loader, so any loader on that frame matches.
    fn is_reached(&self, event: &EventLifecycleEvent) -> bool {
        event.name == self.event
            && event.frame_id == self.frame_id
            && self
                .loader_id
                .as_ref()
                .is_none_or(|loader| *loader == event.loader_id)
    }
}

/// Aborts the request interception task when the render ends.
struct Interceptor(JoinHandle<()>);

impl Drop for Interceptor {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Rendering backend holding a persistent browser per egress port.
pub struct ChromiumBackend {
    slots: HashMap<u16, SessionSlot<ChromiumSession>>,
    settings: RenderSettings,
}

impl ChromiumBackend {
    /// Creates the backend. Browsers launch on first use or on `open`.
    pub fn new(config: &FetcherConfig) -> Self {
        let blocked_patterns: Vec<String> = config
            .blocked_hosts
            .iter()
            .map(|host| format!("*{host}*"))
            .collect();
        let blocked_types = parse_resource_types(&config.blocked_resource_types);

        Self {
            slots: config
                .ports
                .iter()
                .map(|&port| (port, SessionSlot::new(port)))
                .collect(),
            settings: RenderSettings {
                proxy_host: config.proxy_host.clone(),
                credentials: config.credentials.clone(),
                chrome_executable: config.chrome_executable.clone(),
                navigation_timeout: config.navigation_timeout,
                blocked_patterns,
                blocked_types: blocked_types.into(),
                verbose: config.verbose,
            },
        }
    }

    /// Launch count per port, for diagnostics.
    pub fn launches(&self) -> HashMap<u16, usize> {
        self.slots
            .iter()
            .map(|(port, slot)| (*port, slot.launches()))
            .collect()
    }

    fn slot(&self, port: u16) -> Result<&SessionSlot<ChromiumSession>, BackendError> {
        self.slots.get(&port).ok_or(BackendError::UnknownPort(port))
    }

    async fn session(&self, port: u16) -> Result<std::sync::Arc<ChromiumSession>, BackendError> {
        let settings = &self.settings;
        self.slot(port)?
            .get_or_launch(|port| launch(settings, port))
            .await
    }

    async fn render(&self, page: &Page, request: BackendRequest<'_>) -> Result<String, BackendError> {
        if let Some(ref creds) = self.settings.credentials {
            page.authenticate(Credentials {
                username: creds.username.clone(),
                password: creds.password.clone(),
            })
            .await
            .map_err(|err| BackendError::Session(err.to_string()))?;
        }

        if !self.settings.blocked_patterns.is_empty() {
            page.execute(SetBlockedUrLsParams::new(self.settings.blocked_patterns.clone()))
                .await
                .map_err(|err| BackendError::Session(err.to_string()))?;
        }

        let _interceptor = if self.settings.blocked_types.is_empty() {
            None
        } else {
            Some(intercept_resources(page, self.settings.blocked_types.clone(), request.port).await?)
        };

        apply_identity(page, request.headers).await?;

        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(|err| BackendError::Session(err.to_string()))?;
        let mut lifecycle = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(|err| BackendError::Session(err.to_string()))?;

        let navigation = page
            .execute(NavigateParams::new(request.url.as_str()))
            .await
            .map_err(|err| BackendError::Navigation(err.to_string()))?;
        if let Some(ref error) = navigation.error_text {
            return Err(BackendError::Navigation(error.clone()));
        }

        let target = NavigationTarget::new(
            request.wait_until,
            navigation.frame_id.clone(),
            navigation.loader_id.clone(),
        );
        loop {
            match lifecycle.next().await {
                Some(event) if target.is_reached(&event) => break,
                Some(_) => {}
                None => {
                    return Err(BackendError::Navigation("lifecycle stream closed".into()));
                }
            }
        }

        page.content()
            .await
            .map_err(|err| BackendError::Navigation(err.to_string()))
    }
}

#[async_trait]
impl FetchBackend for ChromiumBackend {
    fn name(&self) -> &'static str {
        "chromium"
    }

    async fn open(&self, ports: &[u16]) -> Result<(), BackendError> {
        let launches = ports.iter().map(|&port| self.session(port));
        for result in futures::future::join_all(launches).await {
            result?;
        }
        Ok(())
    }

    async fn execute(&self, request: BackendRequest<'_>) -> Result<FetchPayload, BackendError> {
        if request.method != FetchMethod::Browser {
            return Err(BackendError::Unsupported {
                backend: self.name(),
                method: request.method,
            });
        }

        let session = self.session(request.port).await?;
        let page = session
            .browser
            .new_page("about:blank")
            .await
            .map_err(|err| BackendError::Session(err.to_string()))?;

        let timeout = self.settings.navigation_timeout;
        let rendered = tokio::time::timeout(timeout, self.render(&page, request)).await;

        // The page goes, the browser stays.
        if let Err(err) = page.close().await {
            log::debug!("page close error on port {}: {err}", request.port);
        }

        match rendered {
            Ok(result) => result.map(FetchPayload::Document),
            Err(_) => Err(BackendError::Timeout(timeout)),
        }
    }

    async fn close(&self) {
        for slot in self.slots.values() {
            slot.shutdown().await;
        }
    }
}

async fn launch(settings: &RenderSettings, port: u16) -> Result<ChromiumSession, BackendError> {
    let proxy = format!("http://{}:{}", settings.proxy_host, port);
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .user_data_dir(std::env::temp_dir().join(format!("rotofetch-port-{port}")))
        .request_timeout(settings.navigation_timeout)
        .arg(format!("--proxy-server={proxy}"))
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--mute-audio")
        .arg("--no-first-run");
    if let Some(ref path) = settings.chrome_executable {
        builder = builder.chrome_executable(path);
    }
    if !settings.blocked_types.is_empty() {
        builder = builder.enable_request_intercept();
    }
    let config = builder.build().map_err(BackendError::Session)?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|err| BackendError::Session(format!("launch on port {port} failed: {err}")))?;

    let handler = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                log::debug!("browser handler error on port {port}: {err:?}");
            }
        }
    });

    if settings.verbose {
        log::info!("launched rendering session on port {port} via {proxy}");
    } else {
        log::debug!("launched rendering session on port {port} via {proxy}");
    }

    Ok(ChromiumSession { browser, handler })
}

/// Fails paused requests of a blocked resource type and lets the rest through.
async fn intercept_resources(
    page: &Page,
    blocked: Arc<[ResourceType]>,
    port: u16,
) -> Result<Interceptor, BackendError> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|err| BackendError::Session(err.to_string()))?;
    let page = page.clone();

    let task = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let request_id = event.request_id.clone();
            let result = if is_blocked_resource(&blocked, &event.resource_type) {
                page.execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient))
                    .await
                    .map(drop)
            } else {
                page.execute(ContinueRequestParams::new(request_id))
                    .await
                    .map(drop)
            };
            if let Err(err) = result {
                log::debug!("request interception error on port {port}: {err}");
            }
        }
    });
    Ok(Interceptor(task))
}

fn is_blocked_resource(blocked: &[ResourceType], resource_type: &ResourceType) -> bool {
    blocked.contains(resource_type)
}

/// Parses CDP resource type names, skipping unknown ones.
fn parse_resource_types(names: &[String]) -> Vec<ResourceType> {
    names
        .iter()
        .filter_map(|name| match name.parse::<ResourceType>() {
            Ok(resource_type) => Some(resource_type),
            Err(_) => {
                log::warn!("ignoring unknown resource type {name:?}");
                None
            }
        })
        .collect()
}

async fn apply_identity(page: &Page, headers: &HeaderMap) -> Result<(), BackendError> {
    if let Some(user_agent) = headers.get(USER_AGENT).and_then(|v| v.to_str().ok()) {
        page.execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(|err| BackendError::Session(err.to_string()))?;
    }

    let extra = extra_headers(headers);
    if !extra.is_empty() {
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::Value::Object(extra),
        )))
        .await
        .map_err(|err| BackendError::Session(err.to_string()))?;
    }
    Ok(())
}

/// Headers the browser should send verbatim. The engine manages the rest.
fn extra_headers(headers: &HeaderMap) -> serde_json::Map<String, serde_json::Value> {
    headers
        .iter()
        .filter(|(name, _)| ![USER_AGENT, ACCEPT_ENCODING, HOST].contains(name))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), serde_json::Value::String(v.to_string())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chromiumoxide::cdp::browser_protocol::network::MonotonicTime;
    use http::HeaderValue;
    use http::header::ACCEPT_LANGUAGE;

    fn config() -> FetcherConfig {
        FetcherConfig {
            proxy_host: "127.0.0.1".into(),
            ports: vec![9100, 9101],
            credentials: Some(ProxyCredentials::new("u", "p")),
            blocked_hosts: vec!["tracker.example".into()],
            blocked_resource_types: vec!["Image".into(), "font".into(), "Bogus".into()],
            ..Default::default()
        }
    }

    fn lifecycle(frame: &str, loader: &str, name: &str) -> EventLifecycleEvent {
        EventLifecycleEvent {
            frame_id: FrameId::new(frame),
            loader_id: LoaderId::new(loader),
            name: name.into(),
            timestamp: MonotonicTime::new(0.0),
        }
    }

    #[test]
    fn builds_block_patterns_and_slots() {
        let backend = ChromiumBackend::new(&config());
        assert_eq!(
            backend.settings.blocked_patterns,
            vec!["*tracker.example*".to_string()]
        );
        assert_eq!(
            &*backend.settings.blocked_types,
            &[ResourceType::Image, ResourceType::Font]
        );
        assert_eq!(backend.launches(), HashMap::from([(9100, 0), (9101, 0)]));
    }

    #[test]
    fn blocks_only_configured_resource_types() {
        let blocked = parse_resource_types(&FetcherConfig::default().blocked_resource_types);
        assert!(is_blocked_resource(&blocked, &ResourceType::Image));
        assert!(is_blocked_resource(&blocked, &ResourceType::Font));
        assert!(is_blocked_resource(&blocked, &ResourceType::Stylesheet));
        assert!(!is_blocked_resource(&blocked, &ResourceType::Document));
        assert!(!is_blocked_resource(&blocked, &ResourceType::Script));
        assert!(!is_blocked_resource(&blocked, &ResourceType::Xhr));
        assert!(!is_blocked_resource(&[], &ResourceType::Image));
    }

    #[test]
    fn network_idle_waits_for_the_navigated_frame_and_loader() {
        let target = NavigationTarget::new(
            WaitUntil::NetworkIdle,
            FrameId::new("main"),
            Some(LoaderId::new("nav-2")),
        );
        assert!(!target.is_reached(&lifecycle("iframe", "nav-2", "networkIdle")));
        assert!(!target.is_reached(&lifecycle("main", "nav-1", "networkIdle")));
        assert!(!target.is_reached(&lifecycle("main", "nav-2", "load")));
        assert!(target.is_reached(&lifecycle("main", "nav-2", "networkIdle")));
    }

    #[test]
    fn dom_ready_waits_for_dom_content_loaded_only() {
        let target = NavigationTarget::new(
            WaitUntil::DomReady,
            FrameId::new("main"),
            Some(LoaderId::new("nav-1")),
        );
        assert!(!target.is_reached(&lifecycle("main", "nav-1", "load")));
        assert!(!target.is_reached(&lifecycle("child", "nav-1", "DOMContentLoaded")));
        assert!(target.is_reached(&lifecycle("main", "nav-1", "DOMContentLoaded")));
    }

    #[test]
    fn same_document_navigation_matches_any_loader() {
        let target = NavigationTarget::new(WaitUntil::DomReady, FrameId::new("main"), None);
        assert!(target.is_reached(&lifecycle("main", "earlier", "DOMContentLoaded")));
        assert!(!target.is_reached(&lifecycle("other", "earlier", "DOMContentLoaded")));
    }

    #[test]
    fn extra_headers_skip_engine_managed_ones() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("ua"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US"));
        let extra = extra_headers(&headers);
        assert_eq!(extra.len(), 1);
        assert_eq!(extra["accept-language"], "en-US");
    }

    #[tokio::test]
    async fn rejects_plain_requests() {
        let backend = ChromiumBackend::new(&config());
        let url = url::Url::parse("https://shop.example/").unwrap();
        let headers = HeaderMap::new();
        let request = BackendRequest {
            url: &url,
            port: 9100,
            method: FetchMethod::Get,
            headers: &headers,
            body: None,
            wait_until: WaitUntil::DomReady,
        };
        assert!(matches!(
            backend.execute(request).await,
            Err(BackendError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "Requires a local Chromium and a reachable proxy"]
    async fn renders_through_proxy() {
        let backend = ChromiumBackend::new(&config());
        let url = url::Url::parse("https://example.com/").unwrap();
        let headers = HeaderMap::new();
        let request = BackendRequest {
            url: &url,
            port: 9100,
            method: FetchMethod::Browser,
            headers: &headers,
            body: None,
            wait_until: WaitUntil::NetworkIdle,
        };
        let html = backend.execute(request).await.unwrap().text();
        assert!(html.contains("<html"));
        backend.close().await;
    }
}
