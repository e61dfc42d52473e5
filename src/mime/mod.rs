//! MIME encoding for outgoing messages.
//!
//! Produces an RFC 5322 message with a single quoted-printable body part
//! and prepares it for the DATA phase.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{SinkError, SinkErrorKind, SinkResult};
use crate::message::OutgoingMessage;

/// Maximum header line length before folding.
const MAX_HEADER_LINE: usize = 78;

/// MIME encoder for outgoing messages.
#[derive(Debug, Clone)]
pub struct MimeEncoder {
    date: DateTime<Utc>,
    domain: String,
}

/// An encoded message.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    /// Message-ID without angle brackets.
    pub message_id: String,
    /// RFC 5322 bytes with CRLF line endings.
    pub bytes: Vec<u8>,
}

impl EncodedMessage {
    /// Returns the bytes as lossy UTF-8, for inspection.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl MimeEncoder {
    /// Creates an encoder that mints Message-IDs under `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            domain: domain.into(),
        }
    }

    /// Creates an encoder with a fixed Date header.
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    /// Encodes a message.
    pub fn encode(&self, message: &OutgoingMessage) -> SinkResult<EncodedMessage> {
        let mut output = Vec::with_capacity(message.body().len() + 512);
        let message_id = self.generate_message_id();

        self.write_header(&mut output, "Date", &self.format_date())?;
        self.write_header(&mut output, "From", &Self::encode_address(message.from()))?;

        let to_list: Vec<String> = message.to().iter().map(Self::encode_address).collect();
        self.write_header(&mut output, "To", &to_list.join(", "))?;

        self.write_header(&mut output, "Subject", &Self::encode_header(message.subject()))?;
        self.write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;
        self.write_header(&mut output, "MIME-Version", "1.0")?;
        self.write_header(&mut output, "Content-Type", message.format().content_type())?;
        self.write_header(&mut output, "Content-Transfer-Encoding", "quoted-printable")?;
        output.extend_from_slice(b"\r\n");

        let body = normalize_line_endings(message.body());
        output.extend_from_slice(&quoted_printable::encode(body.as_bytes()));
        output.extend_from_slice(b"\r\n");

        Ok(EncodedMessage {
            message_id,
            bytes: output,
        })
    }

    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> SinkResult<()> {
        if value.contains(['\r', '\n']) {
            return Err(SinkError::message_error(
                SinkErrorKind::InvalidHeader,
                format!("Header {} contains a line break", name),
            ));
        }

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(Self::fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Folds a header line at whitespace to stay near 78 characters.
    fn fold_header(header: &str) -> String {
        if header.len() <= MAX_HEADER_LINE {
            return header.to_string();
        }

        let mut result = String::with_capacity(header.len() + 16);
        let mut current_line = String::new();

        for word in header.split(' ') {
            if current_line.is_empty() {
                current_line.push_str(word);
            } else if current_line.len() + 1 + word.len() <= MAX_HEADER_LINE - 2 {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                result.push_str(&current_line);
                result.push_str("\r\n ");
                current_line = word.to_string();
            }
        }

        result.push_str(&current_line);
        result
    }

    /// Encodes a header value using RFC 2047 when it is not plain ASCII.
    ///
    /// Long values are split into several encoded words so that each
    /// stays under the 75 character limit.
    pub fn encode_header(value: &str) -> String {
        if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
            return value.to_string();
        }

        // 45 input bytes encode to 60 base64 characters.
        let mut words = Vec::new();
        let mut chunk = String::new();
        for c in value.chars() {
            if chunk.len() + c.len_utf8() > 45 {
                words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes())));
                chunk.clear();
            }
            chunk.push(c);
        }
        if !chunk.is_empty() {
            words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes())));
        }
        words.join(" ")
    }

    fn encode_address(address: &crate::message::Address) -> String {
        match &address.name {
            Some(name) if !name.is_ascii() => {
                format!("{} <{}>", Self::encode_header(name), address.email)
            }
            _ => address.to_header(),
        }
    }

    /// Generates a unique message ID.
    pub fn generate_message_id(&self) -> String {
        format!("{}.{}@{}", Uuid::new_v4().simple(), self.date.timestamp(), self.domain)
    }

    fn format_date(&self) -> String {
        self.date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
    }

    /// Prepares the DATA content with dot-stuffing and the terminating
    /// `<CRLF>.<CRLF>` sequence.
    pub fn prepare_data_content(encoded: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(encoded.len() + 100);
        let mut at_line_start = true;

        for &byte in encoded {
            if at_line_start && byte == b'.' {
                output.push(b'.');
            }
            output.push(byte);
            at_line_start = byte == b'\n';
        }

        if !output.ends_with(b"\r\n") {
            if output.ends_with(b"\n") {
                output.pop();
            }
            output.extend_from_slice(b"\r\n");
        }

        output.extend_from_slice(b".\r\n");
        output
    }
}

impl Default for MimeEncoder {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Converts bare LF and bare CR to CRLF so quoted-printable keeps them as
/// hard line breaks.
fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BodyFormat;
    use chrono::TimeZone;

    fn message(body: &str, format: BodyFormat) -> OutgoingMessage {
        OutgoingMessage::builder()
            .from("app@example.com")
            .to("ops@example.com")
            .to("dev@example.com")
            .subject("Log events")
            .body(body)
            .format(format)
            .build()
            .unwrap()
    }

    fn split(encoded: &EncodedMessage) -> (String, String) {
        let text = encoded.as_text();
        let (headers, body) = text.split_once("\r\n\r\n").unwrap();
        (headers.to_string(), body.to_string())
    }

    #[test]
    fn test_html_body() {
        let encoded = MimeEncoder::new("example.com")
            .encode(&message("<b>hi</b>", BodyFormat::Html))
            .unwrap();
        let (headers, body) = split(&encoded);
        assert!(headers.contains("Content-Type: text/html; charset=utf-8"));
        assert!(body.contains("<b>hi</b>"));
    }

    #[test]
    fn test_plain_body() {
        let encoded = MimeEncoder::new("example.com")
            .encode(&message("hi", BodyFormat::PlainText))
            .unwrap();
        let (headers, body) = split(&encoded);
        assert!(headers.contains("Content-Type: text/plain; charset=utf-8"));
        assert!(headers.contains("Content-Transfer-Encoding: quoted-printable"));
        assert_eq!(body, "hi\r\n");
    }

    #[test]
    fn test_headers() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let encoded = MimeEncoder::new("example.com")
            .with_date(date)
            .encode(&message("hi", BodyFormat::PlainText))
            .unwrap();
        let (headers, _) = split(&encoded);

        assert!(headers.contains("Date: Fri, 01 Mar 2024 12:30:00 +0000"));
        assert!(headers.contains("From: app@example.com"));
        assert!(headers.contains("To: ops@example.com, dev@example.com"));
        assert!(headers.contains("Subject: Log events"));
        assert!(headers.contains("MIME-Version: 1.0"));
        assert!(headers.contains(&format!("Message-ID: <{}>", encoded.message_id)));
        assert!(encoded.message_id.ends_with("@example.com"));
    }

    #[test]
    fn test_multiline_body_uses_crlf() {
        let encoded = MimeEncoder::default()
            .encode(&message("first\nsecond\r\nthird", BodyFormat::PlainText))
            .unwrap();
        let (_, body) = split(&encoded);
        assert_eq!(body, "first\r\nsecond\r\nthird\r\n");
    }

    #[test]
    fn test_non_ascii_body_is_quoted_printable() {
        let encoded = MimeEncoder::default()
            .encode(&message("Fehler: Überlauf = 1", BodyFormat::PlainText))
            .unwrap();
        let (_, body) = split(&encoded);
        assert!(body.contains("=C3=9Cberlauf"));
        assert!(body.contains("=3D"));
    }

    #[test]
    fn test_header_encoding() {
        assert_eq!(MimeEncoder::encode_header("Hello"), "Hello");

        let encoded = MimeEncoder::encode_header("Héllo");
        assert_eq!(encoded, format!("=?UTF-8?B?{}?=", BASE64.encode("Héllo")));

        let long = "Ä".repeat(40);
        let encoded = MimeEncoder::encode_header(&long);
        assert!(encoded.split(' ').all(|w| w.len() <= 75));
        assert_eq!(encoded.split(' ').count(), 2);
    }

    #[test]
    fn test_fold_header() {
        let value = vec!["recipient@example.com"; 6].join(", ");
        let folded = MimeEncoder::fold_header(&format!("To: {}", value));
        assert!(folded.contains("\r\n "));
        assert!(folded.split("\r\n").all(|line| line.len() <= MAX_HEADER_LINE));
    }

    #[test]
    fn test_dot_stuffing() {
        let output = MimeEncoder::prepare_data_content(b"Hello\r\n.World\r\n..Test\r\n");
        let output_str = String::from_utf8_lossy(&output);
        assert!(output_str.contains("\r\n..World"));
        assert!(output_str.contains("\r\n...Test"));
        assert!(output_str.ends_with("Test\r\n.\r\n"));

        let output = MimeEncoder::prepare_data_content(b".leading");
        assert_eq!(output, b"..leading\r\n.\r\n");
    }
}
