//! Error types for the email sink.
//!
//! Every failure is terminal for the current send attempt. Errors carry a
//! [`SinkErrorKind`], the SMTP reply code or HTTP status when one exists,
//! and the underlying cause.

use std::fmt;
use thiserror::Error;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkErrorKind {
    // Configuration errors
    /// Configuration is invalid or incomplete.
    ConfigurationInvalid,

    // Certificate store errors
    /// No certificate with the requested thumbprint.
    CertificateNotFound,
    /// Certificate or private key could not be used.
    CertificateUnusable,

    // Connection errors
    /// Connection was refused.
    ConnectionRefused,
    /// Connection was reset or closed by the peer.
    ConnectionReset,
    /// Connect timed out.
    ConnectTimeout,
    /// Read timed out.
    ReadTimeout,
    /// Write timed out.
    WriteTimeout,

    // TLS errors
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// STARTTLS required but not offered.
    StarttlsNotSupported,

    // Authentication errors
    /// Credentials were rejected.
    CredentialsInvalid,
    /// Server offers no usable authentication mechanism.
    AuthMethodNotSupported,
    /// Server requires authentication.
    AuthenticationRequired,

    // Protocol errors
    /// Reply could not be parsed.
    InvalidResponse,
    /// Reply code was not the expected one.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,

    // Message errors
    /// Invalid sender address.
    InvalidFromAddress,
    /// Invalid or missing recipient address.
    InvalidRecipientAddress,
    /// Message exceeds the server size limit.
    MessageTooLarge,
    /// Invalid header.
    InvalidHeader,

    // Token endpoint errors
    /// Token endpoint could not be reached.
    TokenEndpointUnreachable,
    /// Token endpoint answered with a non-success status.
    TokenRequestRejected,
    /// Token response lacked an access token or was not JSON.
    MalformedTokenResponse,
    /// Client assertion could not be built or signed.
    AssertionFailed,

    // Generic
    /// Unknown or internal error.
    Unknown,
}

/// Coarse error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or contradictory configuration, raised before any network call.
    Configuration,
    /// Referenced certificate absent or unusable.
    CertificateLookup,
    /// SMTP or HTTP failure, including rejected token requests.
    Network,
    /// Token endpoint answered without the expected payload.
    MalformedResponse,
    /// The outgoing message itself is invalid.
    Message,
}

impl SinkErrorKind {
    /// Returns the category of this error kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SinkErrorKind::ConfigurationInvalid => ErrorCategory::Configuration,

            SinkErrorKind::CertificateNotFound
            | SinkErrorKind::CertificateUnusable
            | SinkErrorKind::AssertionFailed => ErrorCategory::CertificateLookup,

            SinkErrorKind::MalformedTokenResponse => ErrorCategory::MalformedResponse,

            SinkErrorKind::InvalidFromAddress
            | SinkErrorKind::InvalidRecipientAddress
            | SinkErrorKind::InvalidHeader => ErrorCategory::Message,

            _ => ErrorCategory::Network,
        }
    }
}

impl fmt::Display for SinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            SinkErrorKind::CertificateNotFound => write!(f, "Certificate not found"),
            SinkErrorKind::CertificateUnusable => write!(f, "Certificate unusable"),
            SinkErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            SinkErrorKind::ConnectionReset => write!(f, "Connection reset"),
            SinkErrorKind::ConnectTimeout => write!(f, "Connect timeout"),
            SinkErrorKind::ReadTimeout => write!(f, "Read timeout"),
            SinkErrorKind::WriteTimeout => write!(f, "Write timeout"),
            SinkErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SinkErrorKind::StarttlsNotSupported => write!(f, "STARTTLS not supported"),
            SinkErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            SinkErrorKind::AuthMethodNotSupported => write!(f, "Auth method not supported"),
            SinkErrorKind::AuthenticationRequired => write!(f, "Authentication required"),
            SinkErrorKind::InvalidResponse => write!(f, "Invalid server response"),
            SinkErrorKind::UnexpectedResponse => write!(f, "Unexpected response"),
            SinkErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            SinkErrorKind::InvalidFromAddress => write!(f, "Invalid sender address"),
            SinkErrorKind::InvalidRecipientAddress => write!(f, "Invalid recipient address"),
            SinkErrorKind::MessageTooLarge => write!(f, "Message too large"),
            SinkErrorKind::InvalidHeader => write!(f, "Invalid header"),
            SinkErrorKind::TokenEndpointUnreachable => write!(f, "Token endpoint unreachable"),
            SinkErrorKind::TokenRequestRejected => write!(f, "Token request rejected"),
            SinkErrorKind::MalformedTokenResponse => write!(f, "Malformed token response"),
            SinkErrorKind::AssertionFailed => write!(f, "Client assertion failed"),
            SinkErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let code = Self {
            class: parts.next()?.parse().ok()?,
            subject: parts.next()?.parse().ok()?,
            detail: parts.next()?.parse().ok()?,
        };
        if parts.next().is_some() || !(2..=5).contains(&code.class) {
            return None;
        }
        Some(code)
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Sink error with detailed information.
#[derive(Error, Debug)]
pub struct SinkError {
    kind: SinkErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    http_status: Option<u16>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SinkError {
    /// Creates a new error.
    pub fn new(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            http_status: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the HTTP status returned by the token endpoint.
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SinkErrorKind {
        self.kind
    }

    /// Returns the error category.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns the HTTP status if the error came from the token endpoint.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Returns true for configuration errors.
    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Returns true for SMTP or HTTP transport failures.
    pub fn is_network(&self) -> bool {
        self.category() == ErrorCategory::Network
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::ConfigurationInvalid, message)
    }

    /// Creates a certificate-not-found error.
    pub fn certificate_not_found(thumbprint: &str) -> Self {
        Self::new(
            SinkErrorKind::CertificateNotFound,
            format!("Certificate with thumbprint {} not found", thumbprint),
        )
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::CredentialsInvalid, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::InvalidResponse, message)
    }

    /// Creates a message error.
    pub fn message_error(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates an error from an SMTP reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SinkErrorKind::ServerShutdown,
            500..=503 => SinkErrorKind::InvalidResponse,
            530 => SinkErrorKind::AuthenticationRequired,
            534 | 535 => SinkErrorKind::CredentialsInvalid,
            550 => SinkErrorKind::InvalidRecipientAddress,
            552 => SinkErrorKind::MessageTooLarge,
            553 => SinkErrorKind::InvalidFromAddress,
            400..=599 => SinkErrorKind::UnexpectedResponse,
            _ => SinkErrorKind::Unknown,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        if let Some(status) = self.http_status {
            write!(f, " (HTTP {})", status)?;
        }
        Ok(())
    }
}
