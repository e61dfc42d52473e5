//! Client-credentials token exchange.

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{ClientCredential, OAuth2Settings, ValidatedOAuth2};
use crate::errors::{SinkError, SinkResult};

use super::assertion::{build_assertion, JWT_BEARER_ASSERTION_TYPE};
use super::certificate::{CertificateStore, PemDirectoryStore, SigningCertificate};
use super::http::{HttpRequest, HttpTransport, ReqwestHttpTransport};
use super::token::{parse_token_response, AccessToken};

const GRANT_TYPE: &str = "client_credentials";

/// Credential resolved ahead of the exchange.
#[derive(Clone)]
pub enum PreparedCredential {
    /// Shared client secret.
    Secret(SecretString),
    /// Certificate used to sign a client assertion.
    Certificate(SigningCertificate),
}

impl fmt::Debug for PreparedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreparedCredential::Secret(_) => f.write_str("Secret([REDACTED])"),
            PreparedCredential::Certificate(cert) => {
                f.debug_tuple("Certificate").field(cert).finish()
            }
        }
    }
}

/// A validated exchange whose credential is ready to use.
///
/// Preparing does no network I/O, so configuration and certificate lookup
/// errors surface before the SMTP connection is opened.
#[derive(Debug, Clone)]
pub struct PreparedExchange {
    /// Token endpoint URL.
    pub token_url: String,
    /// Requested scope.
    pub scope: String,
    /// Client id.
    pub client_id: String,
    /// Mailbox identity for XOAUTH2.
    pub token_username: String,
    /// Resolved credential.
    pub credential: PreparedCredential,
}

/// Exchanges client credentials for access tokens.
///
/// Every call performs a fresh request; tokens are not cached.
#[derive(Clone)]
pub struct TokenExchanger {
    http: Arc<dyn HttpTransport>,
    certificates: Option<Arc<dyn CertificateStore>>,
}

impl TokenExchanger {
    /// Creates an exchanger backed by reqwest.
    pub fn new() -> SinkResult<Self> {
        Ok(Self::with_transport(Arc::new(ReqwestHttpTransport::new()?)))
    }

    /// Creates an exchanger over a custom HTTP transport.
    pub fn with_transport(http: Arc<dyn HttpTransport>) -> Self {
        Self {
            http,
            certificates: None,
        }
    }

    /// Uses `store` for certificate lookups instead of the configured
    /// certificate directory.
    pub fn with_certificate_store(mut self, store: Arc<dyn CertificateStore>) -> Self {
        self.certificates = Some(store);
        self
    }

    /// Validates settings and resolves the credential.
    pub fn prepare(&self, settings: &OAuth2Settings) -> SinkResult<PreparedExchange> {
        let validated = settings.validate()?;
        self.prepare_validated(validated, settings)
    }

    fn prepare_validated(
        &self,
        validated: ValidatedOAuth2,
        settings: &OAuth2Settings,
    ) -> SinkResult<PreparedExchange> {
        let credential = match validated.credential {
            ClientCredential::Secret(secret) => PreparedCredential::Secret(secret),
            ClientCredential::Certificate(thumbprint) => {
                let certificate = match (&self.certificates, &settings.certificate_directory) {
                    (Some(store), _) => store.lookup(&thumbprint)?,
                    (None, Some(directory)) => {
                        PemDirectoryStore::new(directory).lookup(&thumbprint)?
                    }
                    (None, None) => {
                        return Err(SinkError::configuration(
                            "certificate_directory must be set to use certificate_thumbprint",
                        ))
                    }
                };
                PreparedCredential::Certificate(certificate)
            }
        };

        Ok(PreparedExchange {
            token_url: validated.token_url,
            scope: validated.scope,
            client_id: validated.application_id,
            token_username: validated.token_username,
            credential,
        })
    }

    /// Performs the exchange for a prepared request.
    pub async fn exchange(&self, prepared: &PreparedExchange) -> SinkResult<AccessToken> {
        match &prepared.credential {
            PreparedCredential::Secret(secret) => {
                self.request_with_secret(
                    &prepared.token_url,
                    &prepared.scope,
                    &prepared.client_id,
                    secret,
                )
                .await
            }
            PreparedCredential::Certificate(certificate) => {
                self.request_with_certificate(
                    &prepared.token_url,
                    &prepared.scope,
                    &prepared.client_id,
                    certificate,
                )
                .await
            }
        }
    }

    /// Prepares and exchanges in one step.
    pub async fn acquire(&self, settings: &OAuth2Settings) -> SinkResult<AccessToken> {
        let prepared = self.prepare(settings)?;
        self.exchange(&prepared).await
    }

    /// Requests a token with a shared secret.
    pub async fn request_with_secret(
        &self,
        token_url: &str,
        scope: &str,
        client_id: &str,
        secret: &SecretString,
    ) -> SinkResult<AccessToken> {
        let form = [
            ("client_id", client_id),
            ("scope", scope),
            ("client_secret", secret.expose_secret().as_str()),
            ("grant_type", GRANT_TYPE),
        ];
        tracing::debug!(token_url, client_id, "Requesting access token with client secret");
        self.post_form(token_url, &form).await
    }

    /// Requests a token with a certificate-signed client assertion.
    pub async fn request_with_certificate(
        &self,
        token_url: &str,
        scope: &str,
        client_id: &str,
        certificate: &SigningCertificate,
    ) -> SinkResult<AccessToken> {
        let assertion = build_assertion(certificate, client_id, token_url, Utc::now().timestamp())?;
        let form = [
            ("client_id", client_id),
            ("scope", scope),
            ("client_assertion_type", JWT_BEARER_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
            ("grant_type", GRANT_TYPE),
        ];
        tracing::debug!(
            token_url,
            client_id,
            thumbprint = certificate.thumbprint(),
            "Requesting access token with client assertion"
        );
        self.post_form(token_url, &form).await
    }

    async fn post_form(&self, token_url: &str, form: &[(&str, &str)]) -> SinkResult<AccessToken> {
        let body = serde_urlencoded::to_string(form).map_err(|e| {
            SinkError::configuration(format!("Cannot encode token request: {}", e)).with_cause(e)
        })?;

        let mut headers = HashMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        headers.insert("Accept".to_string(), "application/json".to_string());

        let response = self
            .http
            .send(HttpRequest {
                url: token_url.to_string(),
                headers,
                body,
            })
            .await
            .map_err(|e| {
                tracing::warn!(token_url, error = %e, "Token request failed");
                e
            })?;

        let token = parse_token_response(&response).map_err(|e| {
            tracing::warn!(
                token_url,
                status = response.status,
                error = %e,
                "Token request rejected"
            );
            e
        })?;
        tracing::info!(token_url, "Access token acquired");
        Ok(token)
    }
}

impl fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("custom_certificate_store", &self.certificates.is_some())
            .finish_non_exhaustive()
    }
}
