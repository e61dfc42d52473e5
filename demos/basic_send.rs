//! Basic Send Example
//!
//! Loads a transport section from JSON and sends one log alert with
//! username/password authentication.
//!
//! Usage: `cargo run --example basic_send -- settings.json`

use integrations_email_sink::{
    BodyFormat, EmailTransport, MessageTemplate, SinkError, TransportConfig,
};

#[tokio::main]
async fn main() -> Result<(), SinkError> {
    let config = match std::env::args().nth(1) {
        Some(path) => TransportConfig::from_json_file(path)?,
        None => TransportConfig::from_json_str(
            r#"{
                "host": "smtp.example.com",
                "port": 587,
                "connection_security": "start_tls",
                "credentials": { "username": "alerts@example.com", "password": "change-me" },
                "connect_timeout": "10s",
                "command_timeout": "30s"
            }"#,
        )?,
    };

    println!("Sending through {}", config.address());
    let transport = EmailTransport::new(config)?;

    let template = MessageTemplate::new(
        "Log Sink <alerts@example.com>",
        vec!["oncall@example.com".to_string()],
        "[ERROR] checkout-service",
    )
    .with_body_format(BodyFormat::Html);

    let message = template.render(
        "<p><b>2024-03-01T12:30:00Z</b> Payment gateway timed out after 30s</p>",
    )?;

    transport.send(&message).await?;
    println!("Delivered");
    Ok(())
}
