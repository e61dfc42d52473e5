//! HTTP transport for token endpoint requests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::{SinkError, SinkErrorKind, SinkResult};

/// Default request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest token response body accepted (1 MiB).
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Form POST request.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// URL-encoded body.
    pub body: String,
}

/// HTTP response.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lowercased names.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request. Redirects and oversized bodies are errors.
    async fn send(&self, request: HttpRequest) -> SinkResult<HttpResponse>;
}

/// reqwest-based transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Creates a transport with default settings.
    pub fn new() -> SinkResult<Self> {
        Self::with_options(DEFAULT_HTTP_TIMEOUT, MAX_RESPONSE_SIZE)
    }

    /// Creates a transport with a custom timeout and body limit.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> SinkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                SinkError::configuration(format!("Failed to create HTTP client: {}", e))
                    .with_cause(e)
            })?;

        Ok(Self {
            client,
            max_response_size,
        })
    }

    fn too_large(&self, size: usize) -> SinkError {
        SinkError::new(
            SinkErrorKind::MalformedTokenResponse,
            format!(
                "Token response of {} bytes exceeds the {} byte limit",
                size, self.max_response_size
            ),
        )
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> SinkResult<HttpResponse> {
        let mut builder = self.client.post(&request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let mut response = builder.body(request.body).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("Token endpoint {} timed out", request.url)
            } else {
                format!("Token endpoint {} unreachable: {}", request.url, e)
            };
            SinkError::new(SinkErrorKind::TokenEndpointUnreachable, message).with_cause(e)
        })?;

        let status = response.status().as_u16();

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(SinkError::new(
                SinkErrorKind::TokenRequestRejected,
                format!("Token endpoint redirected to '{}'", location),
            )
            .with_http_status(status));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();

        if let Some(len) = response.content_length() {
            if len > self.max_response_size as u64 {
                return Err(self.too_large(len as usize).with_http_status(status));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            SinkError::new(
                SinkErrorKind::TokenEndpointUnreachable,
                format!("Failed to read token response: {}", e),
            )
            .with_cause(e)
        })? {
            if body.len() + chunk.len() > self.max_response_size {
                return Err(self.too_large(body.len() + chunk.len()).with_http_status(status));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

impl std::fmt::Debug for ReqwestHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestHttpTransport")
            .field("max_response_size", &self.max_response_size)
            .finish()
    }
}
