//! SMTP protocol types.
//!
//! Commands and replies of RFC 5321 as used by a single-message
//! submission session, plus the ESMTP capabilities that drive TLS and
//! AUTH decisions.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{EnhancedStatusCode, SinkError, SinkResult};

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// Client line answering a 334 challenge.
    AuthResponse(String),
    /// MAIL FROM command.
    MailFrom {
        /// Sender path, already in angle brackets.
        address: String,
        /// SIZE parameter (optional).
        size: Option<usize>,
        /// 8BITMIME parameter.
        body_8bit: bool,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient path, already in angle brackets.
        address: String,
    },
    /// DATA command.
    Data,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            SmtpCommand::AuthResponse(line) => line.clone(),
            SmtpCommand::MailFrom {
                address,
                size,
                body_8bit,
            } => {
                let mut cmd = format!("MAIL FROM:{}", address);
                if let Some(s) = size {
                    cmd.push_str(&format!(" SIZE={}", s));
                }
                if *body_8bit {
                    cmd.push_str(" BODY=8BITMIME");
                }
                cmd
            }
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Returns true if the command line carries secret material.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            SmtpCommand::Auth {
                initial_response: Some(_),
                ..
            } | SmtpCommand::AuthResponse(_)
        )
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpCommand::Auth { mechanism, initial_response: Some(_) } => {
                write!(f, "AUTH {} [REDACTED]", mechanism)
            }
            SmtpCommand::AuthResponse(_) => write!(f, "[REDACTED]"),
            other => write!(f, "{}", other.to_smtp_string()),
        }
    }
}

/// SMTP reply from the server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Reply text lines.
    pub message: Vec<String>,
}

impl SmtpResponse {
    /// Creates a new single-line reply.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
        }
    }

    /// Parses a reply from raw lines.
    pub fn parse(lines: &[String]) -> SinkResult<Self> {
        if lines.is_empty() {
            return Err(SinkError::protocol("Empty response"));
        }

        let mut messages = Vec::with_capacity(lines.len());
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let parsed_code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| SinkError::protocol(format!("Invalid status code: {}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(SinkError::protocol(
                    "Inconsistent status codes in multiline response",
                ));
            }

            let text = line.get(4..).unwrap_or("");
            if i == 0 {
                if let Some((esc, rest)) = Self::parse_enhanced_code(text) {
                    enhanced_code = Some(esc);
                    messages.push(rest.trim().to_string());
                    continue;
                }
            }
            messages.push(text.to_string());
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
        })
    }

    fn parse_enhanced_code(msg: &str) -> Option<(EnhancedStatusCode, &str)> {
        let (first, rest) = msg.split_once(' ').unwrap_or((msg, ""));
        EnhancedStatusCode::parse(first).map(|code| (code, rest))
    }

    /// Returns true if this is a success reply (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts to an error.
    pub fn to_error(&self) -> SinkError {
        let mut err = SinkError::from_smtp_response(self.code, self.full_message());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// ESMTP server capabilities.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Advertised authentication mechanisms the client understands.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// True when an AUTH line was present, even with unknown mechanisms.
    pub auth_advertised: bool,
    /// STARTTLS supported.
    pub starttls: bool,
    /// 8BITMIME supported.
    pub eight_bit_mime: bool,
    /// Raw capability strings.
    pub raw: Vec<String>,
}

impl EsmtpCapabilities {
    /// Parses capabilities from an EHLO reply. The first line is the
    /// server greeting and is skipped.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.message.iter().skip(1) {
            let line = line.trim().to_uppercase();
            caps.raw.push(line.clone());

            // Some servers still send the pre-standard "AUTH=" form.
            let (capability, params) = line
                .split_once(|c: char| c == ' ' || c == '=')
                .unwrap_or((line.as_str(), ""));

            match capability {
                "SIZE" => caps.size = params.trim().parse().ok().filter(|s| *s > 0),
                "AUTH" => {
                    caps.auth_advertised = true;
                    caps.auth_mechanisms
                        .extend(params.split_whitespace().filter_map(AuthMethod::from_capability));
                }
                "STARTTLS" => caps.starttls = true,
                "8BITMIME" => caps.eight_bit_mime = true,
                _ => {}
            }
        }

        caps
    }

    /// Returns true if authentication is available.
    pub fn has_auth(&self) -> bool {
        self.auth_advertised
    }

    /// Returns the advertised mechanisms as a list.
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        self.auth_mechanisms.iter().copied().collect()
    }
}

/// Reply codes used by the session.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Service unavailable.
    pub const SERVICE_UNAVAILABLE: u16 = 421;
    /// Command not implemented.
    pub const NOT_IMPLEMENTED: u16 = 502;
    /// Authentication failed.
    pub const AUTH_FAILED: u16 = 535;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(
            SmtpCommand::Ehlo("localhost".to_string()).to_smtp_string(),
            "EHLO localhost"
        );
        assert_eq!(SmtpCommand::StartTls.to_smtp_string(), "STARTTLS");
        assert_eq!(
            SmtpCommand::MailFrom {
                address: "<test@example.com>".to_string(),
                size: Some(1024),
                body_8bit: true,
            }
            .to_smtp_string(),
            "MAIL FROM:<test@example.com> SIZE=1024 BODY=8BITMIME"
        );
        assert_eq!(
            SmtpCommand::RcptTo { address: "<ops@example.com>".to_string() }.to_smtp_string(),
            "RCPT TO:<ops@example.com>"
        );
    }

    #[test]
    fn test_sensitive_commands_are_redacted() {
        let auth = SmtpCommand::Auth {
            mechanism: "XOAUTH2".to_string(),
            initial_response: Some("dXNlcj0=".to_string()),
        };
        assert!(auth.is_sensitive());
        assert_eq!(auth.to_string(), "AUTH XOAUTH2 [REDACTED]");
        assert_eq!(auth.to_smtp_string(), "AUTH XOAUTH2 dXNlcj0=");

        let reply = SmtpCommand::AuthResponse("cGFzcw==".to_string());
        assert_eq!(reply.to_string(), "[REDACTED]");
        assert!(!SmtpCommand::Data.is_sensitive());
    }

    #[test]
    fn test_response_parse() {
        let response = SmtpResponse::parse(&lines(&["250 OK"])).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_success());
        assert_eq!(response.first_message(), "OK");

        let response = SmtpResponse::parse(&lines(&[
            "250-smtp.example.com Hello",
            "250-SIZE 10485760",
            "250 STARTTLS",
        ]))
        .unwrap();
        assert_eq!(response.message.len(), 3);

        let response = SmtpResponse::parse(&lines(&["354"])).unwrap();
        assert_eq!(response.code, 354);
        assert_eq!(response.first_message(), "");
    }

    #[test]
    fn test_response_parse_errors() {
        assert!(SmtpResponse::parse(&[]).is_err());
        assert!(SmtpResponse::parse(&lines(&["OK"])).is_err());
        assert!(SmtpResponse::parse(&lines(&["250-one", "251 two"])).is_err());
        assert!(SmtpResponse::parse(&lines(&["é5"])).is_err());
    }

    #[test]
    fn test_response_with_enhanced_code() {
        let response =
            SmtpResponse::parse(&lines(&["535 5.7.3 Authentication unsuccessful"])).unwrap();
        let esc = response.enhanced_code.clone().unwrap();
        assert_eq!(esc.to_string(), "5.7.3");
        assert_eq!(response.first_message(), "Authentication unsuccessful");

        let err = response.to_error();
        assert_eq!(err.smtp_code(), Some(535));
        assert_eq!(err.enhanced_code().map(|c| c.to_string()), Some("5.7.3".to_string()));
    }

    #[test]
    fn test_capabilities_parse() {
        let response = SmtpResponse::parse(&lines(&[
            "250-smtp.example.com",
            "250-SIZE 10485760",
            "250-AUTH LOGIN PLAIN XOAUTH2",
            "250-AUTH=LOGIN",
            "250-STARTTLS",
            "250 8BITMIME",
        ]))
        .unwrap();

        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert_eq!(caps.size, Some(10485760));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::Plain));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::Login));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::XOAuth2));
        assert!(!caps.auth_mechanisms.contains(&AuthMethod::CramMd5));
        assert!(caps.has_auth());
        assert!(caps.starttls);
        assert!(caps.eight_bit_mime);
    }

    #[test]
    fn test_greeting_line_is_not_a_capability() {
        let response = SmtpResponse::parse(&lines(&["250 STARTTLS.example.com"])).unwrap();
        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert!(!caps.starttls);
        assert!(!caps.has_auth());
    }
}
