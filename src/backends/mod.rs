//! Execution backends.
//!
//! A backend performs the network operation for one claimed port. The
//! scheduler never knows which backend serves a request beyond the
//! [`FetchMethod`] the caller picked.

pub mod chromium;
pub mod reqwest_backend;
pub mod session;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

pub use chromium::ChromiumBackend;
pub use reqwest_backend::ReqwestBackend;
pub use session::{ManagedSession, SessionSlot};

/// Which backend serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMethod {
    Get,
    Post,
    Browser,
}

impl FetchMethod {
    pub fn is_rendered(self) -> bool {
        matches!(self, FetchMethod::Browser)
    }
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchMethod::Get => "GET",
            FetchMethod::Post => "POST",
            FetchMethod::Browser => "BROWSER",
        })
    }
}

/// How long a rendered fetch waits before extracting the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    #[default]
    DomReady,
    NetworkIdle,
}

/// Caller-facing request options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: FetchMethod,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub wait_until: WaitUntil,
}

impl FetchOptions {
    pub fn get() -> Self {
        Self {
            method: FetchMethod::Get,
            headers: HeaderMap::new(),
            body: None,
            wait_until: WaitUntil::default(),
        }
    }

    pub fn post(body: impl Into<Bytes>) -> Self {
        Self {
            method: FetchMethod::Post,
            body: Some(body.into()),
            ..Self::get()
        }
    }

    pub fn browser() -> Self {
        Self {
            method: FetchMethod::Browser,
            ..Self::get()
        }
    }

    pub fn wait_for_network_idle(mut self) -> Self {
        self.wait_until = WaitUntil::NetworkIdle;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::get()
    }
}

/// Read-only HTTP response returned by the plain backend.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    url: Url,
}

impl FetchResponse {
    pub fn new(status: u16, headers: HeaderMap, body: Bytes, url: Url) -> Self {
        Self {
            status,
            headers,
            body,
            url,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What a successful fetch hands back.
#[derive(Debug, Clone)]
pub enum FetchPayload {
    /// Fully rendered document text.
    Document(String),
    Response(FetchResponse),
}

impl FetchPayload {
    pub fn text(&self) -> String {
        match self {
            FetchPayload::Document(html) => html.clone(),
            FetchPayload::Response(response) => response.text(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchPayload::Document(_) => None,
            FetchPayload::Response(response) => Some(response.status()),
        }
    }

    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            FetchPayload::Response(response) => Some(response),
            FetchPayload::Document(_) => None,
        }
    }

    pub fn into_document(self) -> Option<String> {
        match self {
            FetchPayload::Document(html) => Some(html),
            FetchPayload::Response(_) => None,
        }
    }
}

/// Everything a backend needs for one attempt on one port.
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    pub url: &'a Url,
    pub port: u16,
    pub method: FetchMethod,
    pub headers: &'a HeaderMap,
    pub body: Option<&'a Bytes>,
    pub wait_until: WaitUntil,
}

#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("rendering session error: {0}")]
    Session(String),
    #[error("port {0} has no session in this backend")]
    UnknownPort(u16),
    #[error("{method} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        method: FetchMethod,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}

/// Strategy that performs the network operation for a claimed port.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prepares per-port resources ahead of the first request.
    async fn open(&self, _ports: &[u16]) -> Result<(), BackendError> {
        Ok(())
    }

    async fn execute(&self, request: BackendRequest<'_>) -> Result<FetchPayload, BackendError>;

    /// Releases per-port resources. Called once on shutdown.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builders_set_method_and_body() {
        let post = FetchOptions::post("payload");
        assert_eq!(post.method, FetchMethod::Post);
        assert_eq!(post.body.as_deref(), Some(&b"payload"[..]));

        let browser = FetchOptions::browser().wait_for_network_idle();
        assert!(browser.method.is_rendered());
        assert_eq!(browser.wait_until, WaitUntil::NetworkIdle);
        assert_eq!(FetchMethod::Browser.to_string(), "BROWSER");
    }

    #[test]
    fn payload_accessors() {
        let response = FetchResponse::new(
            404,
            HeaderMap::new(),
            Bytes::from_static(b"missing"),
            Url::parse("https://shop.example/item").unwrap(),
        );
        assert!(!response.is_success());
        let payload = FetchPayload::Response(response);
        assert_eq!(payload.status(), Some(404));
        assert_eq!(payload.text(), "missing");
        assert!(payload.clone().into_document().is_none());

        let doc = FetchPayload::Document("<html></html>".into());
        assert_eq!(doc.status(), None);
        assert_eq!(doc.into_document().as_deref(), Some("<html></html>"));
    }
}
