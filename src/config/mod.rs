//! Configuration types for the email sink transport.
//!
//! Covers the SMTP endpoint, connection security, the authentication mode
//! and the OAuth2 client-credentials settings. A configuration can be
//! assembled with [`TransportConfig::builder`] or loaded from a JSON
//! settings section with [`TransportConfig::from_json_str`].

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{BasicCredentials, CredentialsByHost};
use crate::errors::{SinkError, SinkResult};
use crate::transport::tls::ServerCertificateValidator;

/// Default SMTP port.
pub const DEFAULT_PORT: u16 = 25;

/// Port conventionally used for implicit TLS.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Default timeout for connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default name announced in EHLO.
pub const DEFAULT_CLIENT_NAME: &str = "localhost";

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSecurity {
    /// Plain TCP, never upgraded.
    None,
    /// Implicit TLS on port 465, opportunistic STARTTLS elsewhere.
    #[default]
    Auto,
    /// TLS handshake before the server greeting.
    Implicit,
    /// STARTTLS is required; fail when the server does not offer it.
    StartTls,
    /// STARTTLS when the server offers it, plain otherwise.
    StartTlsWhenAvailable,
}

impl ConnectionSecurity {
    /// Resolves `Auto` against the port; other modes are returned unchanged.
    pub fn resolve(self, port: u16) -> Self {
        match self {
            ConnectionSecurity::Auto if port == IMPLICIT_TLS_PORT => ConnectionSecurity::Implicit,
            ConnectionSecurity::Auto => ConnectionSecurity::StartTlsWhenAvailable,
            other => other,
        }
    }
}

/// Authentication mode used after the session is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMode {
    /// Authenticate only when credentials are configured.
    #[default]
    None,
    /// Username/password authentication.
    Basic,
    /// OAuth2 bearer token via XOAUTH2.
    #[serde(rename = "oauth2")]
    OAuth2,
}

/// Client credential used against the token endpoint.
#[derive(Clone)]
pub enum ClientCredential {
    /// Shared client secret.
    Secret(SecretString),
    /// Thumbprint of a certificate whose private key signs a JWT assertion.
    Certificate(String),
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCredential::Secret(_) => f.debug_tuple("Secret").field(&"[REDACTED]").finish(),
            ClientCredential::Certificate(thumbprint) => {
                f.debug_tuple("Certificate").field(thumbprint).finish()
            }
        }
    }
}

/// OAuth2 client-credentials settings.
#[derive(Clone, Default, Deserialize)]
pub struct OAuth2Settings {
    /// Token endpoint URL.
    pub token_url: Option<String>,
    /// Requested scope.
    pub scope: Option<String>,
    /// Client (application) identifier.
    pub application_id: Option<String>,
    /// Mailbox identity presented in the XOAUTH2 exchange.
    pub token_username: Option<String>,
    /// Shared client secret.
    pub client_secret: Option<SecretString>,
    /// Thumbprint of the signing certificate.
    pub certificate_thumbprint: Option<String>,
    /// Directory of PEM bundles searched for the signing certificate.
    pub certificate_directory: Option<PathBuf>,
}

/// OAuth2 settings that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedOAuth2 {
    /// Token endpoint URL.
    pub token_url: String,
    /// Requested scope.
    pub scope: String,
    /// Client (application) identifier.
    pub application_id: String,
    /// Mailbox identity presented in the XOAUTH2 exchange.
    pub token_username: String,
    /// Credential presented to the token endpoint.
    pub credential: ClientCredential,
}

fn required(value: &Option<String>, name: &str) -> SinkResult<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(SinkError::configuration(format!(
            "{} must be set when using OAuth2 authentication",
            name
        ))),
    }
}

impl OAuth2Settings {
    /// Creates a new settings builder.
    pub fn builder() -> OAuth2SettingsBuilder {
        OAuth2SettingsBuilder::default()
    }

    /// Checks that every required field is present and that exactly one
    /// credential source is configured.
    pub fn validate(&self) -> SinkResult<ValidatedOAuth2> {
        let token_url = required(&self.token_url, "token_url")?;
        let scope = required(&self.scope, "scope")?;
        let application_id = required(&self.application_id, "application_id")?;
        let token_username = required(&self.token_username, "token_username")?;

        let secret = self
            .client_secret
            .as_ref()
            .filter(|s| !s.expose_secret().is_empty());
        let thumbprint = self
            .certificate_thumbprint
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let credential = match (secret, thumbprint) {
            (Some(secret), None) => ClientCredential::Secret(secret.clone()),
            (None, Some(thumbprint)) => ClientCredential::Certificate(thumbprint.to_string()),
            (Some(_), Some(_)) => {
                return Err(SinkError::configuration(
                    "client_secret and certificate_thumbprint are mutually exclusive",
                ))
            }
            (None, None) => {
                return Err(SinkError::configuration(
                    "OAuth2 requires either client_secret or certificate_thumbprint",
                ))
            }
        };

        Ok(ValidatedOAuth2 {
            token_url,
            scope,
            application_id,
            token_username,
            credential,
        })
    }
}

impl fmt::Debug for OAuth2Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Settings")
            .field("token_url", &self.token_url)
            .field("scope", &self.scope)
            .field("application_id", &self.application_id)
            .field("token_username", &self.token_username)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("certificate_thumbprint", &self.certificate_thumbprint)
            .field("certificate_directory", &self.certificate_directory)
            .finish()
    }
}

/// Builder for OAuth2 settings.
#[derive(Debug, Default)]
pub struct OAuth2SettingsBuilder {
    settings: OAuth2Settings,
}

impl OAuth2SettingsBuilder {
    /// Sets the token endpoint URL.
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.settings.token_url = Some(url.into());
        self
    }

    /// Sets the requested scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.settings.scope = Some(scope.into());
        self
    }

    /// Sets the application identifier.
    pub fn application_id(mut self, id: impl Into<String>) -> Self {
        self.settings.application_id = Some(id.into());
        self
    }

    /// Sets the mailbox identity used for XOAUTH2.
    pub fn token_username(mut self, username: impl Into<String>) -> Self {
        self.settings.token_username = Some(username.into());
        self
    }

    /// Sets the shared client secret.
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.settings.client_secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Sets the signing certificate thumbprint.
    pub fn certificate_thumbprint(mut self, thumbprint: impl Into<String>) -> Self {
        self.settings.certificate_thumbprint = Some(thumbprint.into());
        self
    }

    /// Sets the directory searched for PEM certificate bundles.
    pub fn certificate_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.certificate_directory = Some(path.into());
        self
    }

    /// Builds the settings without validating them.
    ///
    /// Validation happens when a message is sent, so an incomplete settings
    /// block only fails the sends that need it.
    pub fn build(self) -> OAuth2Settings {
        self.settings
    }
}

/// Email transport configuration.
#[derive(Clone, Deserialize)]
pub struct TransportConfig {
    /// SMTP server hostname. Blank disables delivery.
    #[serde(default)]
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection security mode.
    #[serde(default)]
    pub connection_security: ConnectionSecurity,
    /// Authentication mode.
    #[serde(default)]
    pub authentication_mode: AuthenticationMode,
    /// Static username/password credentials.
    #[serde(default)]
    pub credentials: Option<BasicCredentials>,
    /// Host-aware credential lookup; takes precedence over `credentials`.
    #[serde(skip)]
    pub credential_provider: Option<Arc<dyn CredentialsByHost>>,
    /// OAuth2 settings, used when `authentication_mode` is `oauth2`.
    #[serde(default)]
    pub oauth2: Option<OAuth2Settings>,
    /// Custom server certificate validator.
    #[serde(skip)]
    pub certificate_validator: Option<Arc<dyn ServerCertificateValidator>>,
    /// Additional PEM bundle of trusted CA certificates.
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,
    /// Name announced in EHLO/HELO.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Command timeout.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_string()
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            connection_security: ConnectionSecurity::default(),
            authentication_mode: AuthenticationMode::default(),
            credentials: None,
            credential_provider: None,
            oauth2: None,
            certificate_validator: None,
            ca_bundle_path: None,
            client_name: default_client_name(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connection_security", &self.connection_security)
            .field("authentication_mode", &self.authentication_mode)
            .field("credentials", &self.credentials)
            .field("credential_provider", &self.credential_provider)
            .field("oauth2", &self.oauth2)
            .field("certificate_validator", &self.certificate_validator.is_some())
            .field("ca_bundle_path", &self.ca_bundle_path)
            .field("client_name", &self.client_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl TransportConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Parses a configuration from a JSON settings section.
    pub fn from_json_str(json: &str) -> SinkResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            SinkError::configuration(format!("Invalid transport configuration: {}", e))
                .with_cause(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SinkResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SinkError::configuration(format!("Cannot read {}: {}", path.display(), e))
                .with_cause(e)
        })?;
        Self::from_json_str(&contents)
    }

    /// Validates the configuration.
    ///
    /// OAuth2 settings are checked when a message is sent, not here.
    pub fn validate(&self) -> SinkResult<()> {
        if self.is_disabled() {
            return Ok(());
        }

        if self.port == 0 {
            return Err(SinkError::configuration("Port must be non-zero"));
        }

        if self.client_name.trim().is_empty() {
            return Err(SinkError::configuration("client_name must not be empty"));
        }

        if self.connect_timeout.is_zero() || self.command_timeout.is_zero() {
            return Err(SinkError::configuration("Timeouts must be non-zero"));
        }

        Ok(())
    }

    /// Returns true when the host is blank and no connection should be made.
    pub fn is_disabled(&self) -> bool {
        self.host.trim().is_empty()
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }

    /// Returns the connection security with `Auto` resolved.
    pub fn effective_security(&self) -> ConnectionSecurity {
        self.connection_security.resolve(self.port)
    }

    /// Returns the credentials to present for this server, if any.
    pub fn resolve_credentials(&self) -> Option<BasicCredentials> {
        match &self.credential_provider {
            Some(provider) => provider.credential(self.host.trim(), self.port, "smtp"),
            None => self.credentials.clone(),
        }
    }
}

/// Builder for transport configuration.
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the connection security mode.
    pub fn connection_security(mut self, security: ConnectionSecurity) -> Self {
        self.config.connection_security = security;
        self
    }

    /// Disables TLS entirely.
    pub fn no_tls(mut self) -> Self {
        self.config.connection_security = ConnectionSecurity::None;
        self
    }

    /// Sets the authentication mode.
    pub fn authentication_mode(mut self, mode: AuthenticationMode) -> Self {
        self.config.authentication_mode = mode;
        self
    }

    /// Sets static username/password credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some(BasicCredentials::new(username, password));
        self
    }

    /// Sets a host-aware credential provider.
    pub fn credential_provider(mut self, provider: Arc<dyn CredentialsByHost>) -> Self {
        self.config.credential_provider = Some(provider);
        self
    }

    /// Sets OAuth2 settings and switches to OAuth2 authentication.
    pub fn oauth2(mut self, settings: OAuth2Settings) -> Self {
        self.config.oauth2 = Some(settings);
        self.config.authentication_mode = AuthenticationMode::OAuth2;
        self
    }

    /// Installs a custom server certificate validator.
    pub fn certificate_validator(mut self, validator: Arc<dyn ServerCertificateValidator>) -> Self {
        self.config.certificate_validator = Some(validator);
        self
    }

    /// Adds a PEM bundle of trusted CA certificates.
    pub fn ca_bundle_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_bundle_path = Some(path.into());
        self
    }

    /// Sets the name announced in EHLO.
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SinkResult<TransportConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn complete_settings() -> OAuth2SettingsBuilder {
        OAuth2Settings::builder()
            .token_url("https://login.example.com/token")
            .scope("https://outlook.office365.com/.default")
            .application_id("app-id")
            .token_username("alerts@example.com")
    }

    fn secret_settings() -> OAuth2Settings {
        complete_settings().client_secret("s").build()
    }

    #[test]
    fn test_config_defaults() {
        let config = TransportConfig::builder()
            .host("smtp.example.com")
            .build()
            .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connection_security, ConnectionSecurity::Auto);
        assert_eq!(config.authentication_mode, AuthenticationMode::None);
        assert_eq!(config.client_name, DEFAULT_CLIENT_NAME);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[rstest]
    #[case(ConnectionSecurity::Auto, 465, ConnectionSecurity::Implicit)]
    #[case(ConnectionSecurity::Auto, 587, ConnectionSecurity::StartTlsWhenAvailable)]
    #[case(ConnectionSecurity::Auto, 25, ConnectionSecurity::StartTlsWhenAvailable)]
    #[case(ConnectionSecurity::StartTls, 465, ConnectionSecurity::StartTls)]
    #[case(ConnectionSecurity::None, 465, ConnectionSecurity::None)]
    fn test_security_resolution(
        #[case] security: ConnectionSecurity,
        #[case] port: u16,
        #[case] expected: ConnectionSecurity,
    ) {
        assert_eq!(security.resolve(port), expected);
    }

    #[test]
    fn test_blank_host_is_valid_and_disabled() {
        let config = TransportConfig::builder().host("   ").port(0).build().unwrap();
        assert!(config.is_disabled());
    }

    #[test]
    fn test_zero_port_rejected() {
        let err = TransportConfig::builder()
            .host("smtp.example.com")
            .port(0)
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_oauth2_secret_variant() {
        let validated = complete_settings().client_secret("s3cret").build().validate().unwrap();
        assert_eq!(validated.application_id, "app-id");
        assert!(matches!(validated.credential, ClientCredential::Secret(_)));
    }

    #[test]
    fn test_oauth2_certificate_variant() {
        let validated = complete_settings()
            .certificate_thumbprint(" ABCDEF ")
            .build()
            .validate()
            .unwrap();
        match validated.credential {
            ClientCredential::Certificate(t) => assert_eq!(t, "ABCDEF"),
            other => panic!("unexpected credential {:?}", other),
        }
    }

    #[rstest]
    #[case::no_token_url(OAuth2Settings { token_url: None, ..secret_settings() })]
    #[case::no_scope(OAuth2Settings { scope: None, ..secret_settings() })]
    #[case::no_application_id(OAuth2Settings { application_id: None, ..secret_settings() })]
    #[case::no_token_username(OAuth2Settings { token_username: None, ..secret_settings() })]
    #[case::blank_user(OAuth2Settings { token_username: Some(" ".into()), ..secret_settings() })]
    #[case::no_credential(complete_settings().build())]
    #[case::both(OAuth2Settings { certificate_thumbprint: Some("A".into()), ..secret_settings() })]
    fn test_oauth2_validation_failures(#[case] settings: OAuth2Settings) {
        let err = settings.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_from_json_str() {
        let json = r#"{
            "host": "smtp.office365.com",
            "port": 587,
            "connection_security": "start_tls",
            "authentication_mode": "oauth2",
            "command_timeout": "15s",
            "oauth2": {
                "token_url": "https://login.example.com/token",
                "scope": "https://outlook.office365.com/.default",
                "application_id": "app-id",
                "token_username": "alerts@example.com",
                "certificate_thumbprint": "56295082F7EA95E68DEB670B48A384929D55FBA1",
                "certificate_directory": "/etc/email-sink/certs"
            }
        }"#;

        let config = TransportConfig::from_json_str(json).unwrap();
        assert_eq!(config.port, 587);
        assert_eq!(config.connection_security, ConnectionSecurity::StartTls);
        assert_eq!(config.authentication_mode, AuthenticationMode::OAuth2);
        assert_eq!(config.command_timeout, Duration::from_secs(15));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        let oauth2 = config.oauth2.unwrap();
        assert_eq!(
            oauth2.certificate_directory.as_deref(),
            Some(Path::new("/etc/email-sink/certs"))
        );
    }

    #[test]
    fn test_from_json_str_with_basic_credentials() {
        let json = r#"{
            "host": "mail.example.com",
            "authentication_mode": "basic",
            "credentials": { "username": "relay", "password": "hunter2" }
        }"#;

        let config = TransportConfig::from_json_str(json).unwrap();
        let creds = config.resolve_credentials().unwrap();
        assert_eq!(creds.username, "relay");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("email.json");
        std::fs::write(&path, r#"{ "host": "mail.example.com", "port": 2525 }"#).unwrap();

        let config = TransportConfig::from_json_file(&path).unwrap();
        assert_eq!(config.address(), "mail.example.com:2525");

        let err = TransportConfig::from_json_file(dir.path().join("missing.json")).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let err = TransportConfig::from_json_str(r#"{ "port": "many" }"#).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_secret_redacted_in_debug() {
        let settings = complete_settings().client_secret("top-secret").build();
        assert!(!format!("{:?}", settings).contains("top-secret"));
        let validated = settings.validate().unwrap();
        assert!(!format!("{:?}", validated).contains("top-secret"));
    }
}
