//! Transport layer for SMTP connections.
//!
//! Provides the [`SmtpTransport`] abstraction over a TCP connection with
//! optional TLS, and the [`SmtpConnector`] seam that opens one per send.

pub mod tls;

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::mem;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::{ConnectionSecurity, TransportConfig};
use crate::errors::{SinkError, SinkErrorKind, SinkResult};
use crate::protocol::{SmtpCommand, SmtpResponse};

use self::tls::TlsSettings;

/// Upper bound on a single reply line.
const MAX_LINE_LENGTH: usize = 4096;

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + fmt::Debug {
    /// Sends a command and receives a response.
    async fn send_command(&mut self, command: &SmtpCommand) -> SinkResult<SmtpResponse>;

    /// Sends raw data (for DATA command body).
    async fn send_data(&mut self, data: &[u8]) -> SinkResult<()>;

    /// Reads a response from the server.
    async fn read_response(&mut self) -> SinkResult<SmtpResponse>;

    /// Upgrades the connection to TLS.
    async fn upgrade_tls(&mut self, tls: &TlsSettings, host: &str) -> SinkResult<()>;

    /// Returns true if TLS is enabled.
    fn is_tls(&self) -> bool;

    /// Sends QUIT if the connection is still open, then shuts it down.
    /// Errors are swallowed; the connection is closed afterwards in all cases.
    async fn close(&mut self);
}

/// Opens SMTP connections.
#[async_trait]
pub trait SmtpConnector: Send + Sync + fmt::Debug {
    /// Connects to the configured server. With `Implicit` security the TLS
    /// handshake completes before this returns; the greeting is left unread.
    async fn connect(
        &self,
        config: &TransportConfig,
        security: ConnectionSecurity,
    ) -> SinkResult<Box<dyn SmtpTransport>>;
}

/// Connector that opens real TCP connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl SmtpConnector for TcpConnector {
    async fn connect(
        &self,
        config: &TransportConfig,
        security: ConnectionSecurity,
    ) -> SinkResult<Box<dyn SmtpTransport>> {
        let mut transport = TcpTransport::connect(config).await?;
        if security == ConnectionSecurity::Implicit {
            transport
                .upgrade_tls(&TlsSettings::from_config(config), config.host.trim())
                .await?;
        }
        Ok(Box::new(transport))
    }
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
    Closed,
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    stream: TransportStream,
    command_timeout: Duration,
    host: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stream = match self.stream {
            TransportStream::Plain(_) => "plain",
            TransportStream::Tls(_) => "tls",
            TransportStream::Closed => "closed",
        };
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("stream", &stream)
            .finish()
    }
}

impl TcpTransport {
    /// Opens a plain TCP connection to the configured server.
    pub async fn connect(config: &TransportConfig) -> SinkResult<Self> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                SinkError::timeout(
                    SinkErrorKind::ConnectTimeout,
                    format!("Connect to {} timed out", address),
                )
            })?
            .map_err(|e| Self::map_io_error(e, &address))?;

        stream.set_nodelay(true).ok();
        tracing::debug!(%address, "Connected");

        Ok(Self {
            stream: TransportStream::Plain(BufReader::new(stream)),
            command_timeout: config.command_timeout,
            host: config.host.trim().to_string(),
        })
    }

    fn map_io_error(error: io::Error, address: &str) -> SinkError {
        let err = match error.kind() {
            io::ErrorKind::ConnectionRefused => SinkError::new(
                SinkErrorKind::ConnectionRefused,
                format!("Connection refused to {}", address),
            ),
            io::ErrorKind::TimedOut => SinkError::timeout(
                SinkErrorKind::ConnectTimeout,
                format!("Connect to {} timed out", address),
            ),
            io::ErrorKind::ConnectionReset => {
                SinkError::new(SinkErrorKind::ConnectionReset, "Connection reset by server")
            }
            _ => SinkError::connection(format!("Connection error to {}: {}", address, error)),
        };
        err.with_cause(error)
    }

    /// Reads lines until a complete (possibly multiline) reply is read.
    async fn read_response_inner<R: AsyncBufRead + Unpin>(
        reader: &mut R,
        timeout_duration: Duration,
    ) -> SinkResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut raw = Vec::new();
            let mut limited = (&mut *reader).take(MAX_LINE_LENGTH as u64 + 1);

            let read = timeout(timeout_duration, limited.read_until(b'\n', &mut raw))
                .await
                .map_err(|_| SinkError::timeout(SinkErrorKind::ReadTimeout, "Read timed out"))?
                .map_err(|e| SinkError::protocol(format!("Read error: {}", e)).with_cause(e))?;

            if read == 0 {
                return Err(SinkError::new(
                    SinkErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }
            if raw.len() > MAX_LINE_LENGTH {
                return Err(SinkError::protocol("Reply line too long"));
            }
            let line = String::from_utf8(raw)
                .map_err(|e| SinkError::protocol("Reply is not valid UTF-8").with_cause(e))?;

            let line = line.trim_end().to_string();

            // code-hyphen marks a continuation line
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        timeout_duration: Duration,
    ) -> SinkResult<()> {
        timeout(timeout_duration, writer.write_all(data))
            .await
            .map_err(|_| SinkError::timeout(SinkErrorKind::WriteTimeout, "Write timed out"))?
            .map_err(|e| SinkError::protocol(format!("Write error: {}", e)).with_cause(e))?;

        timeout(timeout_duration, writer.flush())
            .await
            .map_err(|_| SinkError::timeout(SinkErrorKind::WriteTimeout, "Flush timed out"))?
            .map_err(|e| SinkError::protocol(format!("Flush error: {}", e)).with_cause(e))?;

        Ok(())
    }

    fn closed_error() -> SinkError {
        SinkError::new(SinkErrorKind::ConnectionReset, "Connection is closed")
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SinkResult<SmtpResponse> {
        let line = format!("{}\r\n", command.to_smtp_string());
        tracing::debug!(command = %command, "Sending SMTP command");
        self.send_data(line.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> SinkResult<()> {
        match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            TransportStream::Tls(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            TransportStream::Closed => Err(Self::closed_error()),
        }
    }

    async fn read_response(&mut self) -> SinkResult<SmtpResponse> {
        let response = match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::read_response_inner(stream, self.command_timeout).await?
            }
            TransportStream::Tls(stream) => {
                Self::read_response_inner(stream.as_mut(), self.command_timeout).await?
            }
            TransportStream::Closed => return Err(Self::closed_error()),
        };

        tracing::debug!(
            code = response.code,
            message = %response.first_message(),
            "Received SMTP response"
        );
        Ok(response)
    }

    async fn upgrade_tls(&mut self, tls: &TlsSettings, host: &str) -> SinkResult<()> {
        let tcp_stream = match mem::replace(&mut self.stream, TransportStream::Closed) {
            TransportStream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(SinkError::tls("Connection is not a plain TCP stream"));
            }
        };

        let connector = TlsConnector::from(tls.client_config(host)?);
        let server_name = tls::server_name(host)?;

        let tls_stream = timeout(tls.handshake_timeout, connector.connect(server_name, tcp_stream))
            .await
            .map_err(|_| {
                SinkError::timeout(SinkErrorKind::ConnectTimeout, "TLS handshake timed out")
            })?
            .map_err(|e| SinkError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))?;

        tracing::debug!(host, "TLS established");
        self.stream = TransportStream::Tls(Box::new(BufReader::new(tls_stream)));
        Ok(())
    }

    fn is_tls(&self) -> bool {
        matches!(self.stream, TransportStream::Tls(_))
    }

    async fn close(&mut self) {
        if matches!(self.stream, TransportStream::Closed) {
            return;
        }

        if let Err(e) = self.send_command(&SmtpCommand::Quit).await {
            tracing::debug!(error = %e, "QUIT failed");
        }

        let result = match &mut self.stream {
            TransportStream::Plain(stream) => stream.get_mut().shutdown().await,
            TransportStream::Tls(stream) => stream.get_mut().shutdown().await,
            TransportStream::Closed => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Shutdown failed");
        }
        self.stream = TransportStream::Closed;
    }
}
