//! OAuth2 Certificate Example
//!
//! Sends through Exchange Online using the client-credentials grant with
//! a certificate-signed assertion. The certificate and its private key are
//! read from a PEM bundle in `./certs`, matched by thumbprint.
//!
//! Environment:
//! - `TENANT_ID`, `CLIENT_ID`, `MAILBOX`
//! - `CERT_THUMBPRINT` (hex, separators allowed)

use integrations_email_sink::{
    EmailTransport, OAuth2Settings, OutgoingMessage, SinkError, TransportConfig,
};

fn env(name: &str) -> Result<String, SinkError> {
    std::env::var(name).map_err(|_| SinkError::configuration(format!("{} is not set", name)))
}

#[tokio::main]
async fn main() -> Result<(), SinkError> {
    let mailbox = env("MAILBOX")?;

    let oauth2 = OAuth2Settings::builder()
        .token_url(format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            env("TENANT_ID")?
        ))
        .scope("https://outlook.office365.com/.default")
        .application_id(env("CLIENT_ID")?)
        .token_username(mailbox.clone())
        .certificate_thumbprint(env("CERT_THUMBPRINT")?)
        .certificate_directory("./certs")
        .build();

    let config = TransportConfig::builder()
        .host("smtp.office365.com")
        .port(587)
        .oauth2(oauth2)
        .build()?;

    let message = OutgoingMessage::builder()
        .from(mailbox.as_str())
        .to("oncall@example.com")
        .subject("[FATAL] ingest-worker")
        .body("Worker exited with status 137")
        .build()?;

    EmailTransport::new(config)?.send(&message).await?;
    println!("Delivered via XOAUTH2");
    Ok(())
}
