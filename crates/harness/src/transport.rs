//! HTTP transport seam
//!
//! The harness never talks to the network directly; everything goes through
//! [`Transport`], so scenarios can be driven by reqwest in production and by
//! scripted transports in tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: BTreeMap::new(),
            timeout,
        }
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// What came back over the wire, before any interpretation
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub elapsed: Duration,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request, honouring `request.timeout`
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError>;

    async fn get(&self, url: &str, headers: BTreeMap<String, String>, timeout: Duration) -> Result<RawResponse, TransportError> {
        self.send(HttpRequest::new(Method::Get, url, timeout).with_headers(headers))
            .await
    }

    async fn post(
        &self,
        url: &str,
        body: Option<Value>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        self.send(
            HttpRequest::new(Method::Post, url, timeout)
                .with_body(body)
                .with_headers(headers),
        )
        .await
    }

    async fn put(
        &self,
        url: &str,
        body: Option<Value>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        self.send(
            HttpRequest::new(Method::Put, url, timeout)
                .with_body(body)
                .with_headers(headers),
        )
        .await
    }

    async fn delete(&self, url: &str, headers: BTreeMap<String, String>, timeout: Duration) -> Result<RawResponse, TransportError> {
        self.send(HttpRequest::new(Method::Delete, url, timeout).with_headers(headers))
            .await
    }
}

/// Production transport backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let timeout_ms = request.timeout.as_millis() as u64;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("{} {}", request.method, request.url);
        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| classify(e, timeout_ms))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, timeout_ms))?;

        Ok(RawResponse {
            status,
            headers,
            body,
            elapsed: start.elapsed(),
        })
    }
}

fn classify(err: reqwest::Error, timeout_ms: u64) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout { after_ms: timeout_ms }
    } else if err.is_builder() {
        TransportError::InvalidUrl(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
