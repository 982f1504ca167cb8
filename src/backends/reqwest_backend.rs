//! Reqwest-based implementation of the `FetchBackend` trait.
//!
//! Holds one `reqwest::Client` per egress port, each routed through that
//! port's proxy tunnel with the shared credentials.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap as HttpHeaderMap, HeaderName as HttpHeaderName, HeaderValue as HttpHeaderValue};
use reqwest::{Client, Method, Proxy, header::HeaderMap};

use super::{BackendError, BackendRequest, FetchBackend, FetchMethod, FetchPayload, FetchResponse};
use crate::config::FetcherConfig;

/// Plain proxied HTTP backend.
pub struct ReqwestBackend {
    clients: HashMap<u16, Client>,
    timeout: Duration,
}

impl ReqwestBackend {
    /// Builds one client per configured port. Fails if a proxy URL is invalid.
    pub fn new(config: &FetcherConfig) -> Result<Self, BackendError> {
        let mut clients = HashMap::with_capacity(config.ports.len());
        for &port in &config.ports {
            let mut proxy = Proxy::all(config.proxy_url(port))
                .map_err(|err| BackendError::InvalidRequest(err.to_string()))?;
            if let Some(ref creds) = config.credentials {
                proxy = proxy.basic_auth(&creds.username, &creds.password);
            }

            let client = Client::builder()
                .proxy(proxy)
                .cookie_store(true)
                .timeout(config.request_timeout)
                .build()
                .map_err(|err| BackendError::Transport(err.to_string()))?;
            clients.insert(port, client);
        }

        Ok(Self {
            clients,
            timeout: config.request_timeout,
        })
    }

    /// Wrap pre-built clients, one per port.
    pub fn from_clients(clients: HashMap<u16, Client>, timeout: Duration) -> Self {
        Self { clients, timeout }
    }
}

#[async_trait]
impl FetchBackend for ReqwestBackend {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn execute(&self, request: BackendRequest<'_>) -> Result<FetchPayload, BackendError> {
        let client = self
            .clients
            .get(&request.port)
            .ok_or(BackendError::UnknownPort(request.port))?;

        let method = match request.method {
            FetchMethod::Get => Method::GET,
            FetchMethod::Post => Method::POST,
            FetchMethod::Browser => {
                return Err(BackendError::Unsupported {
                    backend: self.name(),
                    method: request.method,
                });
            }
        };

        let mut builder = client
            .request(method, request.url.as_str())
            .headers(convert_headers(request.headers)?);
        if let Some(body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|err| self.map_error(err))?;
        let status = response.status().as_u16();
        let headers = convert_back_headers(response.headers())?;
        let url = response.url().clone();
        let body = response.bytes().await.map_err(|err| self.map_error(err))?;

        Ok(FetchPayload::Response(FetchResponse::new(
            status, headers, body, url,
        )))
    }
}

impl ReqwestBackend {
    fn map_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

fn convert_headers(headers: &HttpHeaderMap) -> Result<HeaderMap, BackendError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|err| BackendError::InvalidRequest(err.to_string()))?;
        let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
            .map_err(|err| BackendError::InvalidRequest(err.to_string()))?;
        map.append(name, value);
    }
    Ok(map)
}

fn convert_back_headers(map: &HeaderMap) -> Result<HttpHeaderMap, BackendError> {
    let mut headers = HttpHeaderMap::new();
    for (name, value) in map.iter() {
        let http_name = HttpHeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        let http_value = HttpHeaderValue::from_bytes(value.as_bytes())
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        headers.append(http_name, http_value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyCredentials;

    #[test]
    fn builds_one_client_per_port() {
        let config = FetcherConfig {
            proxy_host: "127.0.0.1".into(),
            ports: vec![10001, 10002, 10003],
            credentials: Some(ProxyCredentials::new("user", "pass")),
            ..Default::default()
        };
        let backend = ReqwestBackend::new(&config).unwrap();
        assert_eq!(backend.clients.len(), 3);
    }

    #[tokio::test]
    async fn rejects_rendered_requests_and_unknown_ports() {
        let config = FetcherConfig {
            proxy_host: "127.0.0.1".into(),
            ports: vec![10001],
            credentials: Some(ProxyCredentials::new("user", "pass")),
            ..Default::default()
        };
        let backend = ReqwestBackend::new(&config).unwrap();
        let url = url::Url::parse("http://shop.example/").unwrap();
        let headers = HttpHeaderMap::new();
        let request = BackendRequest {
            url: &url,
            port: 10001,
            method: FetchMethod::Browser,
            headers: &headers,
            body: None,
            wait_until: Default::default(),
        };
        assert!(matches!(
            backend.execute(request).await,
            Err(BackendError::Unsupported { .. })
        ));

        let request = BackendRequest {
            port: 4242,
            method: FetchMethod::Get,
            ..request
        };
        assert!(matches!(
            backend.execute(request).await,
            Err(BackendError::UnknownPort(4242))
        ));
    }
}
