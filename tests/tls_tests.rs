//! Implicit TLS sessions and custom certificate validation.

mod common;

use std::io::BufReader;
use std::sync::{Arc, Mutex};

use common::{serve, ServerScript, Transcript, SIGNING_CERT, SIGNING_KEY};
use integrations_email_sink::{
    CertificateValidationContext, ConnectionSecurity, EmailTransport, ErrorCategory,
    FnCertificateValidator, OutgoingMessage, ServerCertificateValidator, SinkErrorKind,
    TransportConfig,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

fn acceptor() -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut BufReader::new(SIGNING_CERT))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut BufReader::new(SIGNING_KEY))
        .unwrap()
        .unwrap();
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Serves one implicit-TLS session. Yields `None` if the handshake fails.
async fn start_tls_server() -> (u16, JoinHandle<Option<Transcript>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = acceptor();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let stream = acceptor.accept(socket).await.ok()?;
        Some(serve(stream, &ServerScript::default()).await)
    });
    (port, handle)
}

fn config(port: u16) -> integrations_email_sink::TransportConfigBuilder {
    TransportConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .connection_security(ConnectionSecurity::Implicit)
}

fn message() -> OutgoingMessage {
    OutgoingMessage::builder()
        .from("sink@example.com")
        .to("ops@example.com")
        .subject("tls")
        .body("over tls")
        .build()
        .unwrap()
}

#[derive(Debug, Default)]
struct Recording {
    seen: Mutex<Vec<(String, bool, usize)>>,
}

impl ServerCertificateValidator for Recording {
    fn validate(&self, context: &CertificateValidationContext<'_>) -> bool {
        self.seen.lock().unwrap().push((
            context.host.to_string(),
            context.chain_is_valid(),
            context.end_entity.len(),
        ));
        true
    }
}

#[tokio::test]
async fn test_validator_accepts_untrusted_certificate() {
    let (port, server) = start_tls_server().await;
    let validator = Arc::new(Recording::default());

    let config = config(port)
        .certificate_validator(validator.clone())
        .build()
        .unwrap();
    EmailTransport::new(config).unwrap().send(&message()).await.unwrap();

    let transcript = server.await.unwrap().unwrap();
    assert!(transcript.data.contains("over tls"));
    assert!(!transcript.commands.iter().any(|c| c == "STARTTLS"));

    let seen = validator.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (host, chain_valid, der_len) = &seen[0];
    assert_eq!(host, "127.0.0.1");
    assert!(!chain_valid);
    assert!(*der_len > 0);
}

#[tokio::test]
async fn test_untrusted_certificate_rejected_by_default() {
    let (port, server) = start_tls_server().await;

    let err = EmailTransport::new(config(port).build().unwrap())
        .unwrap()
        .send(&message())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), SinkErrorKind::TlsHandshakeFailed);
    assert_eq!(err.category(), ErrorCategory::Network);

    assert!(server.await.unwrap().is_none());
}

#[tokio::test]
async fn test_validator_can_reject() {
    let (port, server) = start_tls_server().await;

    let config = config(port)
        .certificate_validator(Arc::new(FnCertificateValidator::new(|_| false)))
        .build()
        .unwrap();
    let err = EmailTransport::new(config)
        .unwrap()
        .send(&message())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), SinkErrorKind::TlsHandshakeFailed);

    assert!(server.await.unwrap().is_none());
}
