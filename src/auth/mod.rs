//! SASL mechanisms and credential types for SMTP AUTH.
//!
//! Supports:
//! - PLAIN (RFC 4616)
//! - LOGIN (obsolete but widely used)
//! - CRAM-MD5 (RFC 2195)
//! - XOAUTH2 (bearer token)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;

use crate::errors::{SinkError, SinkErrorKind, SinkResult};

/// Authentication mechanisms the transport can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
    /// CRAM-MD5 challenge-response.
    CramMd5,
    /// XOAUTH2 bearer token.
    XOAuth2,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
            AuthMethod::CramMd5 => "CRAM-MD5",
            AuthMethod::XOAuth2 => "XOAUTH2",
        }
    }

    /// Preference among password mechanisms (higher is better).
    fn password_priority(&self) -> Option<u8> {
        match self {
            AuthMethod::CramMd5 => Some(3),
            AuthMethod::Plain => Some(2),
            AuthMethod::Login => Some(1),
            AuthMethod::XOAuth2 => None,
        }
    }

    /// Parses from SMTP capability string.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            "CRAM-MD5" => Some(AuthMethod::CramMd5),
            "XOAUTH2" => Some(AuthMethod::XOAuth2),
            _ => None,
        }
    }

    /// Returns true if this method sends the password in clear text.
    pub fn exposes_password(&self) -> bool {
        matches!(self, AuthMethod::Plain | AuthMethod::Login)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password for password-based mechanisms.
#[derive(Clone, Deserialize)]
pub struct BasicCredentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl BasicCredentials {
    /// Creates new credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Host-aware credential lookup.
///
/// Called with the server host, port and the `"smtp"` authentication type.
/// Returning `None` means the session proceeds without AUTH.
pub trait CredentialsByHost: Send + Sync + fmt::Debug {
    /// Returns credentials for the given endpoint.
    fn credential(&self, host: &str, port: u16, auth_type: &str) -> Option<BasicCredentials>;
}

impl CredentialsByHost for BasicCredentials {
    fn credential(&self, _host: &str, _port: u16, _auth_type: &str) -> Option<BasicCredentials> {
        Some(self.clone())
    }
}

/// Authentication mechanism encodings.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(username: &str, password: &SecretString) -> String {
        // \0username\0password
        let response = format!("\0{}\0{}", username, password.expose_secret());
        BASE64.encode(response)
    }

    /// Generates LOGIN username response.
    pub fn login_username(username: &str) -> String {
        BASE64.encode(username)
    }

    /// Generates LOGIN password response.
    pub fn login_password(password: &SecretString) -> String {
        BASE64.encode(password.expose_secret())
    }

    /// Generates CRAM-MD5 response.
    pub fn cram_md5_response(
        challenge: &str,
        username: &str,
        password: &SecretString,
    ) -> SinkResult<String> {
        let challenge_bytes = BASE64.decode(challenge.trim()).map_err(|e| {
            SinkError::authentication(format!("Invalid CRAM-MD5 challenge: {}", e)).with_cause(e)
        })?;

        type HmacMd5 = Hmac<Md5>;
        let mut mac = HmacMd5::new_from_slice(password.expose_secret().as_bytes())
            .map_err(|e| SinkError::authentication(format!("HMAC error: {}", e)))?;
        mac.update(&challenge_bytes);
        let digest = mac.finalize().into_bytes();

        let hex_digest: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(BASE64.encode(format!("{} {}", username, hex_digest)))
    }

    /// Generates XOAUTH2 initial response.
    pub fn xoauth2_initial_response(username: &str, access_token: &SecretString) -> String {
        let response = format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            username,
            access_token.expose_secret()
        );
        BASE64.encode(response)
    }

    /// Picks the strongest password mechanism the server offers.
    ///
    /// Preference is CRAM-MD5, then PLAIN, then LOGIN.
    pub fn select_password_method(available: &[AuthMethod]) -> SinkResult<AuthMethod> {
        available
            .iter()
            .filter_map(|m| m.password_priority().map(|p| (p, *m)))
            .max_by_key(|(p, _)| *p)
            .map(|(_, m)| m)
            .ok_or_else(|| {
                SinkError::new(
                    SinkErrorKind::AuthMethodNotSupported,
                    "Server offers no supported password mechanism",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_from_capability() {
        assert_eq!(AuthMethod::from_capability("PLAIN"), Some(AuthMethod::Plain));
        assert_eq!(AuthMethod::from_capability("login"), Some(AuthMethod::Login));
        assert_eq!(AuthMethod::from_capability("CRAM-MD5"), Some(AuthMethod::CramMd5));
        assert_eq!(AuthMethod::from_capability("xoauth2"), Some(AuthMethod::XOAuth2));
        assert_eq!(AuthMethod::from_capability("GSSAPI"), None);
    }

    #[test]
    fn test_plain_initial_response() {
        let password = SecretString::new("password".to_string());
        let response = Authenticator::plain_initial_response("user", &password);
        assert_eq!(BASE64.decode(&response).unwrap(), b"\0user\0password");
    }

    #[test]
    fn test_cram_md5_response() {
        // RFC 2195 example
        let challenge = BASE64.encode("<1896.697170952@postoffice.reston.mci.net>");
        let password = SecretString::new("tanstaaftanstaaf".to_string());
        let response = Authenticator::cram_md5_response(&challenge, "tim", &password).unwrap();
        let decoded = String::from_utf8(BASE64.decode(response).unwrap()).unwrap();
        assert_eq!(decoded, "tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_cram_md5_rejects_bad_challenge() {
        let password = SecretString::new("pw".to_string());
        let err = Authenticator::cram_md5_response("not base64!", "user", &password).unwrap_err();
        assert_eq!(err.kind(), SinkErrorKind::CredentialsInvalid);
    }

    #[test]
    fn test_xoauth2_initial_response() {
        let token = SecretString::new("abc123".to_string());
        let response = Authenticator::xoauth2_initial_response("alerts@example.com", &token);
        let decoded = String::from_utf8(BASE64.decode(&response).unwrap()).unwrap();
        assert_eq!(decoded, "user=alerts@example.com\x01auth=Bearer abc123\x01\x01");
    }

    #[test]
    fn test_select_password_method() {
        let all = [AuthMethod::Login, AuthMethod::Plain, AuthMethod::CramMd5];
        assert_eq!(Authenticator::select_password_method(&all).unwrap(), AuthMethod::CramMd5);

        let no_cram = [AuthMethod::Login, AuthMethod::Plain, AuthMethod::XOAuth2];
        assert_eq!(Authenticator::select_password_method(&no_cram).unwrap(), AuthMethod::Plain);

        let login_only = [AuthMethod::Login];
        assert_eq!(Authenticator::select_password_method(&login_only).unwrap(), AuthMethod::Login);

        let err = Authenticator::select_password_method(&[AuthMethod::XOAuth2]).unwrap_err();
        assert_eq!(err.kind(), SinkErrorKind::AuthMethodNotSupported);
    }

    #[test]
    fn test_credentials_debug() {
        let creds = BasicCredentials::new("user", "secret_password");
        let debug_str = format!("{:?}", creds);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret_password"));
    }

    #[test]
    fn test_basic_credentials_by_host() {
        let creds = BasicCredentials::new("relay", "pw");
        let found = creds.credential("mail.example.com", 25, "smtp").unwrap();
        assert_eq!(found.username, "relay");
    }
}
