//! HTTP transport seam.
//!
//! The retry loop and the pool talk to a [`Transport`], so tests can
//! substitute an in-memory fake. [`ReqwestTransport`] is the real one.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::FetchError;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// Scheduling hint for the request.
///
/// Mask images are fetched at [`Low`](Self::Low) priority so they do
/// not compete with the media being displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Auto,
    Low,
}

/// A request, reusable across retry attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub priority: Priority,
}

impl HttpRequest {
    /// A `GET` for `url`.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the body is not valid JSON
    /// for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::Transport(format!("invalid JSON body: {e}")))
    }
}

/// Sends a single request attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` once.
    ///
    /// Any response, including non-2xx, is `Ok`; `Err` means no
    /// response was received.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an existing client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        // reqwest has no request priority; the hint only shows up in traces.
        tracing::trace!(url = %request.url, priority = ?request.priority, "sending request");

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }
}
