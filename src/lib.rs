//! # Email Sink
//!
//! Delivery core for a logging email sink. Log events arrive as finished
//! messages and leave over SMTP:
//! - One SMTP session per message (implicit TLS, STARTTLS or plain)
//! - Password mechanisms (CRAM-MD5, PLAIN, LOGIN) and XOAUTH2
//! - OAuth2 client credentials with a shared secret or a certificate-signed
//!   JWT assertion
//! - Custom server certificate validation
//! - A blank host disables delivery without failing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_email_sink::{EmailTransport, OutgoingMessage, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::builder()
//!         .host("smtp.example.com")
//!         .port(587)
//!         .credentials("alerts@example.com", "password")
//!         .build()?;
//!
//!     let transport = EmailTransport::new(config)?;
//!
//!     let message = OutgoingMessage::builder()
//!         .from("alerts@example.com")
//!         .to("oncall@example.com")
//!         .subject("[ERROR] payment-service")
//!         .body("Connection pool exhausted")
//!         .build()?;
//!
//!     transport.send(&message).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;
pub mod oauth2;

// Message construction
pub mod message;
pub mod mime;

// Client
pub mod client;

// Test utilities
pub mod mocks;

pub use auth::{AuthMethod, BasicCredentials, CredentialsByHost};
pub use client::{EmailDelivery, EmailTransport, EmailTransportBuilder};
pub use config::{
    AuthenticationMode, ClientCredential, ConnectionSecurity, OAuth2Settings, TransportConfig,
    TransportConfigBuilder,
};
pub use errors::{ErrorCategory, SinkError, SinkErrorKind, SinkResult};
pub use message::{Address, BodyFormat, MessageTemplate, OutgoingMessage};
pub use mime::{EncodedMessage, MimeEncoder};
pub use oauth2::{
    AccessToken, CertificateStore, InMemoryCertificateStore, PemDirectoryStore,
    SigningCertificate, TokenExchanger,
};
pub use protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
pub use transport::tls::{
    CertificateValidationContext, FnCertificateValidator, ServerCertificateValidator,
};
pub use transport::{SmtpConnector, SmtpTransport, TcpConnector};
