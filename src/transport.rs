//! HTTP transport abstraction.
//!
//! All network traffic (live submissions, queue replay, cache fills, push
//! registration, search) goes through the [`Transport`] trait so tests can
//! swap in an in-memory implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::action::QueuedAction;
use crate::config::ApiConfig;
use crate::error::{Error, Result};

/// A request about to leave the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Target URL, absolute or relative to the transport's base.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Header pairs sent verbatim.
    pub headers: Vec<(String, String)>,
    /// Body bytes, if any.
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    /// A bare GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A POST with a JSON body and content type.
    #[must_use]
    pub fn post_json(url: impl Into<String>, body: String) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(Bytes::from(body)),
        }
    }

    /// Reconstructs the exact request a queued action describes.
    #[must_use]
    pub fn from_action(action: &QueuedAction) -> Self {
        Self {
            url: action.url.clone(),
            method: action.method.clone(),
            headers: action.headers.clone(),
            body: if action.body.is_empty() {
                None
            } else {
                Some(Bytes::from(action.body.clone()))
            },
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A response as the engine sees it.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Full response body.
    pub body: Bytes,
}

impl TransportResponse {
    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The engine's single seam to the network.
///
/// `Err` means the request never produced an HTTP response (offline, DNS,
/// timeout); a server answer of any status is `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the server's response.
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse>;
}

/// Default transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base: Option<Url>,
}

impl HttpTransport {
    /// Builds a transport from the API configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is unparseable or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base = config
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| Error::Config(format!("invalid base URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self { client, base })
    }

    /// Resolves a possibly-relative URL against the configured base.
    fn resolve(&self, url: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        match &self.base {
            Some(base) => base
                .join(url)
                .map_err(|e| Error::InvalidRequest(format!("cannot resolve {url}: {e}"))),
            None => Err(Error::InvalidRequest(format!(
                "relative URL {url} with no base configured"
            ))),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let url = self.resolve(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("bad method {}", request.method)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::InvalidRequest(format!("bad header name {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::InvalidRequest(format!("bad value for header {name}")))?;
            headers.insert(name, value);
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(n, v)| (n.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
