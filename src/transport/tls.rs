//! TLS client configuration.
//!
//! Builds the rustls client configuration used for implicit TLS and
//! STARTTLS. Trust starts from the Mozilla root set, can be extended with
//! a PEM bundle, and can be overridden per connection by a
//! [`ServerCertificateValidator`].

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TransportConfig;
use crate::errors::{SinkError, SinkResult};

/// What a [`ServerCertificateValidator`] sees for each handshake.
#[derive(Debug)]
pub struct CertificateValidationContext<'a> {
    /// Host name the client connected to.
    pub host: &'a str,
    /// DER encoded server certificate.
    pub end_entity: &'a [u8],
    /// DER encoded intermediate certificates, as sent by the server.
    pub intermediates: Vec<&'a [u8]>,
    /// Failure reported by the default chain validation, if any.
    pub chain_error: Option<String>,
}

impl CertificateValidationContext<'_> {
    /// Returns true if the default chain validation accepted the certificate.
    pub fn chain_is_valid(&self) -> bool {
        self.chain_error.is_none()
    }
}

/// Decides whether a server certificate is trusted.
///
/// The validator receives the default verdict and may override it in
/// either direction.
pub trait ServerCertificateValidator: Send + Sync + fmt::Debug {
    /// Returns true to accept the certificate.
    fn validate(&self, context: &CertificateValidationContext<'_>) -> bool;
}

/// Adapts a closure into a [`ServerCertificateValidator`].
pub struct FnCertificateValidator<F>(F);

impl<F> FnCertificateValidator<F>
where
    F: Fn(&CertificateValidationContext<'_>) -> bool + Send + Sync,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnCertificateValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCertificateValidator")
    }
}

impl<F> ServerCertificateValidator for FnCertificateValidator<F>
where
    F: Fn(&CertificateValidationContext<'_>) -> bool + Send + Sync,
{
    fn validate(&self, context: &CertificateValidationContext<'_>) -> bool {
        (self.0)(context)
    }
}

/// Verifier that runs WebPKI validation and lets the validator decide.
#[derive(Debug)]
struct PolicyVerifier {
    host: String,
    inner: Arc<WebPkiServerVerifier>,
    validator: Arc<dyn ServerCertificateValidator>,
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verdict = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);

        let context = CertificateValidationContext {
            host: &self.host,
            end_entity: end_entity.as_ref(),
            intermediates: intermediates.iter().map(|c| c.as_ref()).collect(),
            chain_error: verdict.as_ref().err().map(|e| e.to_string()),
        };

        if self.validator.validate(&context) {
            if let Some(error) = &context.chain_error {
                tracing::warn!(
                    host = %self.host,
                    %error,
                    "Server certificate accepted by custom validator"
                );
            }
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::debug!(host = %self.host, "Server certificate rejected by custom validator");
            Err(verdict.err().unwrap_or_else(|| {
                rustls::Error::General("server certificate rejected by validator".to_string())
            }))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// TLS settings derived from the transport configuration.
#[derive(Clone, Debug)]
pub struct TlsSettings {
    /// Custom certificate validator.
    pub validator: Option<Arc<dyn ServerCertificateValidator>>,
    /// Additional trusted CA bundle.
    pub ca_bundle_path: Option<PathBuf>,
    /// Handshake timeout.
    pub handshake_timeout: Duration,
}

impl TlsSettings {
    /// Extracts the TLS settings from a transport configuration.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            validator: config.certificate_validator.clone(),
            ca_bundle_path: config.ca_bundle_path.clone(),
            handshake_timeout: config.connect_timeout,
        }
    }

    /// Builds the trust anchors.
    pub fn root_store(&self) -> SinkResult<RootCertStore> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(path) = &self.ca_bundle_path {
            let file = File::open(path).map_err(|e| {
                SinkError::configuration(format!("Cannot open CA bundle {}: {}", path.display(), e))
                    .with_cause(e)
            })?;
            let mut reader = BufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| {
                    SinkError::configuration(format!("Invalid CA bundle {}: {}", path.display(), e))
                        .with_cause(e)
                })?;
                roots.add(cert).map_err(|e| {
                    SinkError::configuration(format!("Unusable CA certificate: {}", e))
                        .with_cause(e)
                })?;
            }
        }

        Ok(roots)
    }

    /// Builds the client configuration for a connection to `host`.
    pub fn client_config(&self, host: &str) -> SinkResult<Arc<ClientConfig>> {
        let roots = self.root_store()?;

        let config = match &self.validator {
            Some(validator) => {
                let inner = WebPkiServerVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| {
                        SinkError::tls(format!("Cannot build certificate verifier: {}", e))
                    })?;
                let verifier = PolicyVerifier {
                    host: host.to_string(),
                    inner,
                    validator: validator.clone(),
                };
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_no_client_auth()
            }
            None => ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }
}

/// Converts a host into a TLS server name.
pub fn server_name(host: &str) -> SinkResult<ServerName<'static>> {
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|_| SinkError::tls(format!("Invalid server name: {}", host)))
}
