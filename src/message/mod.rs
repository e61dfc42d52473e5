//! Outgoing message types.
//!
//! An [`OutgoingMessage`] is the already-rendered email a log pipeline hands
//! to the transport: sender, recipients, subject, body and body format.
//! [`MessageTemplate`] holds the static parts so a host integration only
//! supplies the rendered body.

use serde::Deserialize;
use std::fmt;

use crate::errors::{SinkError, SinkErrorKind, SinkResult};

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Display name (e.g., "Ops Alerts").
    pub name: Option<String>,
    /// Mailbox (e.g., "alerts@example.com").
    pub email: String,
}

/// Which message field an address belongs to; selects the error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressRole {
    Sender,
    Recipient,
}

impl AddressRole {
    fn error_kind(self) -> SinkErrorKind {
        match self {
            AddressRole::Sender => SinkErrorKind::InvalidFromAddress,
            AddressRole::Recipient => SinkErrorKind::InvalidRecipientAddress,
        }
    }
}

impl Address {
    /// Parses an address (e.g., `Ops Alerts <alerts@example.com>`).
    pub fn parse(s: &str) -> SinkResult<Self> {
        Self::parse_as(s, AddressRole::Recipient)
    }

    fn parse_as(s: &str, role: AddressRole) -> SinkResult<Self> {
        let s = s.trim();

        if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
            if start < end {
                let name = s[..start].trim().trim_matches('"').trim();
                let email = s[start + 1..end].trim();
                Self::validate_email(email, role)?;
                return Ok(Self {
                    name: (!name.is_empty()).then(|| name.to_string()),
                    email: email.to_string(),
                });
            }
        }

        Self::validate_email(s, role)?;
        Ok(Self {
            name: None,
            email: s.to_string(),
        })
    }

    fn validate_email(email: &str, role: AddressRole) -> SinkResult<()> {
        let fail = |reason: &str| {
            Err(SinkError::message_error(
                role.error_kind(),
                format!("Invalid address '{}': {}", email, reason),
            ))
        };

        if email.is_empty() {
            return fail("address cannot be empty");
        }
        if email.len() > 254 {
            return fail("address too long (max 254 characters)");
        }
        if email.chars().any(|c| c.is_control() || c.is_whitespace() || c == '<' || c == '>') {
            return fail("address contains forbidden characters");
        }

        let (local, domain) = match email.rsplit_once('@') {
            Some(parts) => parts,
            None => return fail("address must contain @"),
        };
        if local.is_empty() || local.len() > 64 {
            return fail("local part must be 1-64 characters");
        }
        if domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
            return fail("invalid domain");
        }

        Ok(())
    }

    /// Returns the mailbox part only.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Formats the address for MAIL FROM/RCPT TO.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }

    /// Formats the address for message headers, without encoding.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\" <{}>", escaped, self.email)
            }
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl TryFrom<&str> for Address {
    type Error = SinkError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Address::parse(s)
    }
}

/// Body content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    /// `text/plain`.
    #[default]
    PlainText,
    /// `text/html`.
    Html,
}

impl BodyFormat {
    /// Selects the format from an "is HTML" flag.
    pub fn from_is_html(is_html: bool) -> Self {
        if is_html {
            BodyFormat::Html
        } else {
            BodyFormat::PlainText
        }
    }

    /// Returns the MIME type with charset.
    pub fn content_type(&self) -> &'static str {
        match self {
            BodyFormat::PlainText => "text/plain; charset=utf-8",
            BodyFormat::Html => "text/html; charset=utf-8",
        }
    }
}

/// A rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    from: Address,
    to: Vec<Address>,
    subject: String,
    body: String,
    format: BodyFormat,
}

impl OutgoingMessage {
    /// Creates a new message builder.
    pub fn builder() -> OutgoingMessageBuilder {
        OutgoingMessageBuilder::default()
    }

    /// Sender.
    pub fn from(&self) -> &Address {
        &self.from
    }

    /// Recipients in order, duplicates kept.
    pub fn to(&self) -> &[Address] {
        &self.to
    }

    /// Subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Body format.
    pub fn format(&self) -> BodyFormat {
        self.format
    }
}

/// Builder for [`OutgoingMessage`].
///
/// Addresses are kept as text until [`build`](Self::build) so that every
/// parse failure surfaces from one place.
#[derive(Debug, Default)]
pub struct OutgoingMessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: String,
    body: String,
    format: BodyFormat,
}

impl OutgoingMessageBuilder {
    /// Sets the sender.
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Adds a recipient.
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Adds several recipients.
    pub fn to_many<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the body format.
    pub fn format(mut self, format: BodyFormat) -> Self {
        self.format = format;
        self
    }

    /// Marks the body as HTML.
    pub fn html(mut self) -> Self {
        self.format = BodyFormat::Html;
        self
    }

    /// Builds the message.
    pub fn build(self) -> SinkResult<OutgoingMessage> {
        let from = self.from.ok_or_else(|| {
            SinkError::message_error(SinkErrorKind::InvalidFromAddress, "Sender is required")
        })?;
        let from = Address::parse_as(&from, AddressRole::Sender)?;

        if self.to.is_empty() {
            return Err(SinkError::message_error(
                SinkErrorKind::InvalidRecipientAddress,
                "At least one recipient is required",
            ));
        }
        let to = self
            .to
            .iter()
            .map(|a| Address::parse_as(a, AddressRole::Recipient))
            .collect::<SinkResult<Vec<_>>>()?;

        if self.subject.contains(['\r', '\n']) {
            return Err(SinkError::message_error(
                SinkErrorKind::InvalidHeader,
                "Subject must not contain line breaks",
            ));
        }

        Ok(OutgoingMessage {
            from,
            to,
            subject: self.subject,
            body: self.body,
            format: self.format,
        })
    }
}

/// Static envelope and format for messages produced from log output.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageTemplate {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Body format.
    #[serde(default)]
    pub body_format: BodyFormat,
}

impl MessageTemplate {
    /// Creates a template.
    pub fn new(from: impl Into<String>, to: Vec<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to,
            subject: subject.into(),
            body_format: BodyFormat::PlainText,
        }
    }

    /// Sets the body format.
    pub fn with_body_format(mut self, format: BodyFormat) -> Self {
        self.body_format = format;
        self
    }

    /// Produces a message carrying `body`.
    pub fn render(&self, body: impl Into<String>) -> SinkResult<OutgoingMessage> {
        OutgoingMessage::builder()
            .from(self.from.clone())
            .to_many(self.to.iter().cloned())
            .subject(self.subject.clone())
            .body(body)
            .format(self.body_format)
            .build()
    }
}
