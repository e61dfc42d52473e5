//! Token endpoint responses.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::errors::{SinkError, SinkErrorKind, SinkResult};

use super::http::HttpResponse;

/// Bearer access token returned by the token endpoint.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    /// Wraps a raw token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into()))
    }

    /// Exposes the token value.
    pub fn secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Converts into the inner secret.
    pub fn into_secret(self) -> SecretString {
        self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// OAuth2 error response (RFC 6749 section 5.2).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenErrorResponse {
    /// Error code.
    pub error: String,
    /// Human readable description.
    #[serde(default)]
    pub error_description: Option<String>,
    /// Link to more information.
    #[serde(default)]
    pub error_uri: Option<String>,
}

impl fmt::Display for TokenErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(description) = &self.error_description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}

/// Turns a token endpoint response into an access token.
///
/// Non-2xx statuses are rejected with the provider's error code when the
/// body carries one. A 2xx body must be a JSON object whose `access_token`
/// is present and non-empty; non-string values are used in their JSON text
/// form.
pub fn parse_token_response(response: &HttpResponse) -> SinkResult<AccessToken> {
    if !response.is_success() {
        let detail = serde_json::from_str::<TokenErrorResponse>(&response.body)
            .map(|e| e.to_string())
            .unwrap_or_else(|_| truncate(&response.body, 200));
        let message = if detail.is_empty() {
            format!("Token endpoint returned HTTP {}", response.status)
        } else {
            format!("Token endpoint returned HTTP {}: {}", response.status, detail)
        };
        return Err(SinkError::new(SinkErrorKind::TokenRequestRejected, message)
            .with_http_status(response.status));
    }

    let value: Value = serde_json::from_str(&response.body).map_err(|e| {
        SinkError::new(
            SinkErrorKind::MalformedTokenResponse,
            format!("Token response is not valid JSON: {}", e),
        )
        .with_http_status(response.status)
        .with_cause(e)
    })?;

    let object = value.as_object().ok_or_else(|| {
        SinkError::new(
            SinkErrorKind::MalformedTokenResponse,
            "Token response is not a JSON object",
        )
        .with_http_status(response.status)
    })?;

    let token = match object.get("access_token") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    match token {
        Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
        _ => Err(SinkError::new(
            SinkErrorKind::MalformedTokenResponse,
            "Token response has no access_token",
        )
        .with_http_status(response.status)),
    }
}

fn truncate(body: &str, max: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
