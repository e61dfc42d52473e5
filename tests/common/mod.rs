//! Scripted in-process SMTP server for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use integrations_email_sink::{ConnectionSecurity, TransportConfig, TransportConfigBuilder};

pub const SIGNING_BUNDLE: &[u8] = include_bytes!("../fixtures/signing_bundle.pem");
pub const SIGNING_CERT: &[u8] = include_bytes!("../fixtures/signing_cert.pem");
pub const SIGNING_KEY: &[u8] = include_bytes!("../fixtures/signing_key.pem");
pub const SIGNING_PUBLIC_KEY: &[u8] = include_bytes!("../fixtures/signing_public.pem");
pub const THUMBPRINT: &str = "56295082F7EA95E68DEB670B48A384929D55FBA1";

/// How the scripted server answers.
#[derive(Debug, Clone)]
pub struct ServerScript {
    /// EHLO keywords after the greeting line.
    pub capabilities: Vec<String>,
    /// Reply code for AUTH commands.
    pub auth_code: u16,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            capabilities: vec!["8BITMIME".to_string(), "SIZE 10485760".to_string()],
            auth_code: 235,
        }
    }
}

impl ServerScript {
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.push(capability.to_string());
        self
    }

    pub fn with_auth_code(mut self, code: u16) -> Self {
        self.auth_code = code;
        self
    }
}

/// What the server saw during one session.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    pub commands: Vec<String>,
    pub data: String,
}

impl Transcript {
    pub fn auth_commands(&self) -> Vec<&String> {
        self.commands.iter().filter(|c| c.starts_with("AUTH")).collect()
    }

    pub fn rcpt_commands(&self) -> Vec<&String> {
        self.commands.iter().filter(|c| c.starts_with("RCPT TO:")).collect()
    }
}

/// Listener that serves one scripted session per accepted connection.
pub struct ScriptedServer {
    pub port: u16,
    handle: JoinHandle<Vec<Transcript>>,
}

impl ScriptedServer {
    /// Serves `sessions` plain-text sessions.
    pub async fn start(script: ServerScript, sessions: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let script = Arc::new(script);

        let handle = tokio::spawn(async move {
            let mut tasks = Vec::new();
            for _ in 0..sessions {
                let (socket, _) = listener.accept().await.unwrap();
                let script = script.clone();
                tasks.push(tokio::spawn(async move { serve(socket, &script).await }));
            }
            let mut transcripts = Vec::new();
            for task in tasks {
                transcripts.push(task.await.unwrap());
            }
            transcripts
        });

        Self { port, handle }
    }

    /// Waits for every session to finish.
    pub async fn transcripts(self) -> Vec<Transcript> {
        self.handle.await.unwrap()
    }

    /// Waits for the single session to finish.
    pub async fn transcript(self) -> Transcript {
        self.transcripts().await.remove(0)
    }

    /// Configuration builder pointed at this server, without TLS.
    pub fn config(&self) -> TransportConfigBuilder {
        TransportConfig::builder()
            .host("127.0.0.1")
            .port(self.port)
            .connection_security(ConnectionSecurity::None)
    }
}

/// Runs one SMTP session on `stream`.
pub async fn serve<S>(stream: S, script: &ServerScript) -> Transcript
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut transcript = Transcript::default();

    reply(&mut stream, "220 test.local ESMTP ready\r\n").await;

    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        let upper = line.to_uppercase();
        transcript.commands.push(line);

        if upper.starts_with("EHLO") {
            let mut response = String::from("250-test.local\r\n");
            for (i, capability) in script.capabilities.iter().enumerate() {
                let sep = if i + 1 == script.capabilities.len() { ' ' } else { '-' };
                response.push_str(&format!("250{}{}\r\n", sep, capability));
            }
            if script.capabilities.is_empty() {
                response = "250 test.local\r\n".to_string();
            }
            reply(&mut stream, &response).await;
        } else if upper.starts_with("HELO") {
            reply(&mut stream, "250 test.local\r\n").await;
        } else if upper.starts_with("AUTH") {
            reply(&mut stream, &format!("{} 2.7.0 auth result\r\n", script.auth_code)).await;
        } else if upper.starts_with("MAIL") || upper.starts_with("RCPT") {
            reply(&mut stream, "250 2.1.0 OK\r\n").await;
        } else if upper == "DATA" {
            reply(&mut stream, "354 Start mail input\r\n").await;
            loop {
                let mut data_line = String::new();
                if stream.read_line(&mut data_line).await.unwrap_or(0) == 0 {
                    return transcript;
                }
                if data_line == ".\r\n" {
                    break;
                }
                transcript.data.push_str(&data_line);
            }
            reply(&mut stream, "250 2.0.0 Queued\r\n").await;
        } else if upper == "QUIT" {
            reply(&mut stream, "221 2.0.0 Bye\r\n").await;
            break;
        } else {
            reply(&mut stream, "502 5.5.2 Command not recognized\r\n").await;
        }
    }

    transcript
}

async fn reply<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut BufReader<S>, text: &str) {
    let _ = stream.get_mut().write_all(text.as_bytes()).await;
    let _ = stream.get_mut().flush().await;
}
