//! Mock implementations for testing.
//!
//! Scripted SMTP and HTTP transports that record what the client sends.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{ConnectionSecurity, TransportConfig};
use crate::errors::{SinkError, SinkErrorKind, SinkResult};
use crate::message::OutgoingMessage;
use crate::oauth2::{HttpRequest, HttpResponse, HttpTransport};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::tls::TlsSettings;
use crate::transport::{SmtpConnector, SmtpTransport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct SessionState {
    responses: VecDeque<SmtpResponse>,
    commands: Vec<SmtpCommand>,
    data: Vec<Vec<u8>>,
    fail_next: Option<SinkError>,
    tls: bool,
    tls_upgraded: bool,
    closed: bool,
}

/// Scripted SMTP transport.
///
/// Clones share state, so a test keeps one handle for assertions while the
/// client owns another. With the queue empty, `DATA` gets 354 and every
/// other command gets 250.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<SessionState>>,
}

impl MockTransport {
    /// Creates a mock with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        lock(&self.state).responses.push_back(response);
        self
    }

    /// Queues a 220 greeting.
    pub fn queue_ok_greeting(&self) -> &Self {
        self.queue_response(greeting_response())
    }

    /// Queues an EHLO reply advertising `capabilities`.
    pub fn queue_ehlo(&self, capabilities: &[&str]) -> &Self {
        self.queue_response(ehlo_response(capabilities))
    }

    /// Queues a successful MAIL, `recipients` RCPT, DATA and final reply.
    pub fn queue_transaction(&self, recipients: usize) -> &Self {
        self.queue_response(SmtpResponse::new(codes::OK, "2.1.0 Sender OK"));
        for _ in 0..recipients {
            self.queue_response(SmtpResponse::new(codes::OK, "2.1.5 Recipient OK"));
        }
        self.queue_response(data_ready_response());
        self.queue_response(SmtpResponse::new(codes::OK, "2.0.0 Queued"))
    }

    /// Queues a greeting and EHLO reply; the rest uses the defaults.
    pub fn script_session(&self, capabilities: &[&str]) -> &Self {
        self.queue_ok_greeting();
        self.queue_ehlo(capabilities)
    }

    /// Makes the next operation fail.
    pub fn fail_next_with(&self, error: SinkError) -> &Self {
        lock(&self.state).fail_next = Some(error);
        self
    }

    /// Starts the session as if implicit TLS had been negotiated.
    pub fn set_tls(&self, enabled: bool) {
        lock(&self.state).tls = enabled;
    }

    /// Commands sent so far.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        lock(&self.state).commands.clone()
    }

    /// DATA payloads sent so far.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        lock(&self.state).data.clone()
    }

    /// Returns true once `close` was called.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Returns true if STARTTLS upgraded the session.
    pub fn tls_upgraded(&self) -> bool {
        lock(&self.state).tls_upgraded
    }

    fn take_failure(&self) -> SinkResult<()> {
        match lock(&self.state).fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_response(&self, command: Option<&SmtpCommand>) -> SmtpResponse {
        let mut state = lock(&self.state);
        state.responses.pop_front().unwrap_or_else(|| match command {
            Some(SmtpCommand::Data) => data_ready_response(),
            _ => SmtpResponse::new(codes::OK, "OK"),
        })
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SinkResult<SmtpResponse> {
        self.take_failure()?;
        lock(&self.state).commands.push(command.clone());
        Ok(self.next_response(Some(command)))
    }

    async fn send_data(&mut self, data: &[u8]) -> SinkResult<()> {
        self.take_failure()?;
        lock(&self.state).data.push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> SinkResult<SmtpResponse> {
        self.take_failure()?;
        Ok(self.next_response(None))
    }

    async fn upgrade_tls(&mut self, _tls: &TlsSettings, _host: &str) -> SinkResult<()> {
        self.take_failure()?;
        let mut state = lock(&self.state);
        if state.tls {
            return Err(SinkError::tls("Already using TLS"));
        }
        state.tls = true;
        state.tls_upgraded = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        lock(&self.state).tls
    }

    async fn close(&mut self) {
        lock(&self.state).closed = true;
    }
}

/// Connector handing out a shared [`MockTransport`].
#[derive(Debug)]
pub struct MockConnector {
    transport: MockTransport,
    connections: AtomicUsize,
    refuse: bool,
}

impl MockConnector {
    /// Connects every session to `transport`.
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            connections: AtomicUsize::new(0),
            refuse: false,
        }
    }

    /// A connector whose connections are always refused.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(MockTransport::new())
        }
    }

    /// Number of connection attempts.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SmtpConnector for MockConnector {
    async fn connect(
        &self,
        config: &TransportConfig,
        security: ConnectionSecurity,
    ) -> SinkResult<Box<dyn SmtpTransport>> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(SinkError::new(
                SinkErrorKind::ConnectionRefused,
                format!("Connection to {} refused", config.address()),
            ));
        }
        if security == ConnectionSecurity::Implicit {
            self.transport.set_tls(true);
        }
        Ok(Box::new(self.transport.clone()))
    }
}

/// HTTP transport returning queued responses and recording requests.
#[derive(Debug, Default)]
pub struct MockHttpTransport {
    responses: Mutex<VecDeque<SinkResult<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpTransport {
    /// Creates a mock with no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    /// Queues a JSON response with `status`.
    pub fn queue_json(&self, status: u16, body: &str) -> &Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        self.queue_response(HttpResponse {
            status,
            headers,
            body: body.to_string(),
        })
    }

    /// Queues a transport failure.
    pub fn queue_error(&self, error: SinkError) -> &Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// Requests sent so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> SinkResult<HttpResponse> {
        let url = request.url.clone();
        lock(&self.requests).push(request);
        lock(&self.responses).pop_front().unwrap_or_else(|| {
            Err(SinkError::new(
                SinkErrorKind::TokenEndpointUnreachable,
                format!("No mock response queued for {}", url),
            ))
        })
    }
}

/// A plain-text message with one recipient.
pub fn test_message() -> SinkResult<OutgoingMessage> {
    OutgoingMessage::builder()
        .from("app@example.com")
        .to("ops@example.com")
        .subject("Test")
        .body("hi")
        .build()
}

/// An HTML message with one recipient.
pub fn test_message_html() -> SinkResult<OutgoingMessage> {
    OutgoingMessage::builder()
        .from("app@example.com")
        .to("ops@example.com")
        .subject("Test")
        .body("<b>hi</b>")
        .html()
        .build()
}

/// A 220 greeting.
pub fn greeting_response() -> SmtpResponse {
    SmtpResponse::new(codes::SERVICE_READY, "smtp.example.com ESMTP ready")
}

/// A multi-line EHLO reply.
pub fn ehlo_response(capabilities: &[&str]) -> SmtpResponse {
    let mut message = vec!["smtp.example.com Hello".to_string()];
    message.extend(capabilities.iter().map(|c| c.to_string()));
    SmtpResponse {
        code: codes::OK,
        enhanced_code: None,
        message,
    }
}

/// A 354 reply.
pub fn data_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input; end with <CRLF>.<CRLF>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_records_and_defaults() {
        let mock = MockTransport::new();
        mock.queue_ok_greeting();

        let mut transport = mock.clone();
        assert_eq!(transport.read_response().await.unwrap().code, 220);
        assert_eq!(
            transport.send_command(&SmtpCommand::Data).await.unwrap().code,
            354
        );
        assert_eq!(
            transport.send_command(&SmtpCommand::Quit).await.unwrap().code,
            250
        );
        transport.close().await;

        assert_eq!(mock.recorded_commands().len(), 2);
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_mock_transport_failure() {
        let mock = MockTransport::new();
        mock.fail_next_with(SinkError::connection("reset"));

        let mut transport = mock.clone();
        assert!(transport.send_command(&SmtpCommand::Quit).await.is_err());
        assert!(transport.send_command(&SmtpCommand::Quit).await.is_ok());
    }

    #[tokio::test]
    async fn test_refusing_connector() {
        let connector = MockConnector::refusing();
        let config = TransportConfig::builder().host("smtp.example.com").build().unwrap();
        let err = connector
            .connect(&config, ConnectionSecurity::None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SinkErrorKind::ConnectionRefused);
        assert_eq!(connector.connections(), 1);
    }

    #[tokio::test]
    async fn test_mock_http_without_response() {
        let http = MockHttpTransport::new();
        let err = http
            .send(HttpRequest {
                url: "https://login.example.com/token".to_string(),
                headers: HashMap::new(),
                body: String::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SinkErrorKind::TokenEndpointUnreachable);
        assert_eq!(http.requests().len(), 1);
    }
}
