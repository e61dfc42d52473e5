//! Email delivery over SMTP.
//!
//! [`EmailTransport`] runs one complete SMTP session per message:
//! connect, optional TLS, optional authentication, one mail transaction,
//! then QUIT. Nothing is pooled, retried or cached between sends, so a
//! single transport can be shared freely across tasks.

use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;

use crate::auth::{AuthMethod, Authenticator, BasicCredentials};
use crate::config::{AuthenticationMode, ConnectionSecurity, TransportConfig};
use crate::errors::{SinkError, SinkErrorKind, SinkResult};
use crate::message::OutgoingMessage;
use crate::mime::{EncodedMessage, MimeEncoder};
use crate::oauth2::{PreparedExchange, TokenExchanger};
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand};
use crate::transport::tls::TlsSettings;
use crate::transport::{SmtpConnector, SmtpTransport, TcpConnector};

/// Delivers one message. Logging integrations depend on this seam only.
#[async_trait]
pub trait EmailDelivery: Send + Sync {
    /// Sends `message`, returning once the server accepted it.
    async fn deliver(&self, message: &OutgoingMessage) -> SinkResult<()>;
}

/// How the session will authenticate, resolved before connecting.
enum AuthPlan {
    Anonymous,
    Password(BasicCredentials),
    OAuth2(Box<PreparedExchange>),
}

/// SMTP email transport.
#[derive(Debug, Clone)]
pub struct EmailTransport {
    config: Arc<TransportConfig>,
    connector: Arc<dyn SmtpConnector>,
    exchanger: TokenExchanger,
    tls: TlsSettings,
    message_id_domain: String,
}

impl EmailTransport {
    /// Creates a transport with the default TCP connector and token exchanger.
    pub fn new(config: TransportConfig) -> SinkResult<Self> {
        EmailTransportBuilder::new(config).build()
    }

    /// Creates a builder.
    pub fn builder(config: TransportConfig) -> EmailTransportBuilder {
        EmailTransportBuilder::new(config)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends a message.
    ///
    /// With a blank host the message is encoded and then dropped. OAuth2
    /// settings and the signing certificate are checked before any
    /// connection is made. The session is closed on every path.
    pub async fn send(&self, message: &OutgoingMessage) -> SinkResult<()> {
        let encoded = MimeEncoder::new(self.message_id_domain.as_str()).encode(message)?;

        if self.config.is_disabled() {
            tracing::warn!(
                message_id = %encoded.message_id,
                "SMTP host is blank, message not delivered"
            );
            return Ok(());
        }

        let plan = self.plan_authentication()?;
        let security = self.config.effective_security();

        tracing::debug!(
            address = %self.config.address(),
            ?security,
            message_id = %encoded.message_id,
            "Opening SMTP session"
        );
        let mut transport = self.connector.connect(&self.config, security).await?;

        let result = self
            .run_session(transport.as_mut(), security, plan, message, &encoded)
            .await;
        transport.close().await;

        match &result {
            Ok(()) => tracing::info!(
                message_id = %encoded.message_id,
                recipients = message.to().len(),
                "Message delivered"
            ),
            Err(e) => {
                tracing::warn!(message_id = %encoded.message_id, error = %e, "Delivery failed")
            }
        }
        result
    }

    fn plan_authentication(&self) -> SinkResult<AuthPlan> {
        match self.config.authentication_mode {
            AuthenticationMode::OAuth2 => {
                let settings = self.config.oauth2.as_ref().ok_or_else(|| {
                    SinkError::configuration(
                        "oauth2 settings must be set when authentication_mode is oauth2",
                    )
                })?;
                Ok(AuthPlan::OAuth2(Box::new(self.exchanger.prepare(settings)?)))
            }
            AuthenticationMode::None | AuthenticationMode::Basic => {
                Ok(match self.config.resolve_credentials() {
                    Some(credentials) => AuthPlan::Password(credentials),
                    None => AuthPlan::Anonymous,
                })
            }
        }
    }

    async fn run_session(
        &self,
        transport: &mut dyn SmtpTransport,
        security: ConnectionSecurity,
        plan: AuthPlan,
        message: &OutgoingMessage,
        encoded: &EncodedMessage,
    ) -> SinkResult<()> {
        let greeting = transport.read_response().await?;
        if greeting.code != codes::SERVICE_READY {
            return Err(greeting.to_error());
        }

        let mut capabilities = self.hello(transport).await?;

        if !transport.is_tls() && self.should_start_tls(security, &capabilities)? {
            let response = transport.send_command(&SmtpCommand::StartTls).await?;
            if response.code == codes::SERVICE_READY {
                transport.upgrade_tls(&self.tls, self.config.host.trim()).await?;
                capabilities = self.hello(transport).await?;
            } else if security == ConnectionSecurity::StartTls {
                return Err(SinkError::new(
                    SinkErrorKind::StarttlsNotSupported,
                    format!("STARTTLS refused: {}", response.full_message()),
                )
                .with_smtp_code(response.code));
            } else {
                tracing::warn!(code = response.code, "STARTTLS refused, continuing without TLS");
            }
        }

        self.authenticate(transport, &capabilities, plan).await?;
        self.transaction(transport, &capabilities, message, encoded).await
    }

    fn should_start_tls(
        &self,
        security: ConnectionSecurity,
        capabilities: &EsmtpCapabilities,
    ) -> SinkResult<bool> {
        match security {
            ConnectionSecurity::StartTls if !capabilities.starttls => Err(SinkError::new(
                SinkErrorKind::StarttlsNotSupported,
                "Server does not advertise STARTTLS",
            )),
            ConnectionSecurity::StartTls => Ok(true),
            ConnectionSecurity::StartTlsWhenAvailable => Ok(capabilities.starttls),
            _ => Ok(false),
        }
    }

    /// EHLO, falling back to HELO for servers without ESMTP.
    async fn hello(&self, transport: &mut dyn SmtpTransport) -> SinkResult<EsmtpCapabilities> {
        let name = self.config.client_name.clone();
        let response = transport.send_command(&SmtpCommand::Ehlo(name.clone())).await?;
        if response.is_success() {
            return Ok(EsmtpCapabilities::from_ehlo_response(&response));
        }

        tracing::debug!(code = response.code, "EHLO rejected, falling back to HELO");
        let response = transport.send_command(&SmtpCommand::Helo(name)).await?;
        if !response.is_success() {
            return Err(response.to_error());
        }
        Ok(EsmtpCapabilities::default())
    }

    async fn authenticate(
        &self,
        transport: &mut dyn SmtpTransport,
        capabilities: &EsmtpCapabilities,
        plan: AuthPlan,
    ) -> SinkResult<()> {
        if matches!(plan, AuthPlan::Anonymous) {
            return Ok(());
        }
        if !capabilities.has_auth() {
            return Err(SinkError::new(
                SinkErrorKind::AuthMethodNotSupported,
                "Credentials are configured but the server does not advertise AUTH",
            ));
        }

        match plan {
            AuthPlan::Anonymous => Ok(()),
            AuthPlan::Password(credentials) => {
                let method = Authenticator::select_password_method(&capabilities.auth_methods())?;
                if method.exposes_password() && !transport.is_tls() {
                    tracing::warn!(mechanism = %method, "Sending credentials without TLS");
                }
                tracing::debug!(
                    mechanism = %method,
                    username = %credentials.username,
                    "Authenticating"
                );
                match method {
                    AuthMethod::Plain => auth_plain(transport, &credentials).await,
                    AuthMethod::Login => auth_login(transport, &credentials).await,
                    AuthMethod::CramMd5 => auth_cram_md5(transport, &credentials).await,
                    AuthMethod::XOAuth2 => Err(SinkError::new(
                        SinkErrorKind::AuthMethodNotSupported,
                        "XOAUTH2 requires OAuth2 authentication mode",
                    )),
                }
            }
            AuthPlan::OAuth2(prepared) => {
                if !capabilities.auth_mechanisms.contains(&AuthMethod::XOAuth2) {
                    tracing::debug!("Server does not list XOAUTH2, attempting it anyway");
                }
                let token = self.exchanger.exchange(&prepared).await?;
                tracing::debug!(username = %prepared.token_username, "Authenticating with XOAUTH2");
                auth_xoauth2(transport, &prepared.token_username, &token.into_secret()).await
            }
        }
    }

    async fn transaction(
        &self,
        transport: &mut dyn SmtpTransport,
        capabilities: &EsmtpCapabilities,
        message: &OutgoingMessage,
        encoded: &EncodedMessage,
    ) -> SinkResult<()> {
        let size = encoded.bytes.len();
        if let Some(max) = capabilities.size {
            if size > max {
                return Err(SinkError::message_error(
                    SinkErrorKind::MessageTooLarge,
                    format!("Message of {} bytes exceeds the server limit of {}", size, max),
                ));
            }
        }

        let mail_from = SmtpCommand::MailFrom {
            address: message.from().to_smtp(),
            size: capabilities.size.map(|_| size),
            body_8bit: capabilities.eight_bit_mime && !encoded.bytes.is_ascii(),
        };
        let response = transport.send_command(&mail_from).await?;
        if !response.is_success() {
            return Err(response.to_error());
        }

        for recipient in message.to() {
            let response = transport
                .send_command(&SmtpCommand::RcptTo {
                    address: recipient.to_smtp(),
                })
                .await?;
            if !response.is_success() {
                return Err(response.to_error());
            }
        }

        let response = transport.send_command(&SmtpCommand::Data).await?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(response.to_error());
        }

        transport
            .send_data(&MimeEncoder::prepare_data_content(&encoded.bytes))
            .await?;

        let response = transport.read_response().await?;
        if !response.is_success() {
            return Err(response.to_error());
        }
        Ok(())
    }
}

#[async_trait]
impl EmailDelivery for EmailTransport {
    async fn deliver(&self, message: &OutgoingMessage) -> SinkResult<()> {
        self.send(message).await
    }
}

async fn auth_plain(
    transport: &mut dyn SmtpTransport,
    credentials: &BasicCredentials,
) -> SinkResult<()> {
    let command = SmtpCommand::Auth {
        mechanism: AuthMethod::Plain.mechanism_name().to_string(),
        initial_response: Some(Authenticator::plain_initial_response(
            &credentials.username,
            &credentials.password,
        )),
    };
    let response = transport.send_command(&command).await?;
    expect_auth_success(response.code, || response.to_error())
}

async fn auth_login(
    transport: &mut dyn SmtpTransport,
    credentials: &BasicCredentials,
) -> SinkResult<()> {
    let command = SmtpCommand::Auth {
        mechanism: AuthMethod::Login.mechanism_name().to_string(),
        initial_response: None,
    };
    let response = transport.send_command(&command).await?;
    if response.code != codes::AUTH_CONTINUE {
        return Err(response.to_error());
    }

    let response = transport
        .send_command(&SmtpCommand::AuthResponse(Authenticator::login_username(
            &credentials.username,
        )))
        .await?;
    if response.code != codes::AUTH_CONTINUE {
        return Err(response.to_error());
    }

    let response = transport
        .send_command(&SmtpCommand::AuthResponse(Authenticator::login_password(
            &credentials.password,
        )))
        .await?;
    expect_auth_success(response.code, || response.to_error())
}

async fn auth_cram_md5(
    transport: &mut dyn SmtpTransport,
    credentials: &BasicCredentials,
) -> SinkResult<()> {
    let command = SmtpCommand::Auth {
        mechanism: AuthMethod::CramMd5.mechanism_name().to_string(),
        initial_response: None,
    };
    let response = transport.send_command(&command).await?;
    if response.code != codes::AUTH_CONTINUE {
        return Err(response.to_error());
    }

    let answer = Authenticator::cram_md5_response(
        response.first_message(),
        &credentials.username,
        &credentials.password,
    )?;
    let response = transport.send_command(&SmtpCommand::AuthResponse(answer)).await?;
    expect_auth_success(response.code, || response.to_error())
}

/// XOAUTH2 (Google/Microsoft SASL profile). A failure arrives as a 334
/// carrying an error document; an empty line ends the exchange and the
/// server then sends the final error reply.
async fn auth_xoauth2(
    transport: &mut dyn SmtpTransport,
    username: &str,
    access_token: &SecretString,
) -> SinkResult<()> {
    let command = SmtpCommand::Auth {
        mechanism: AuthMethod::XOAuth2.mechanism_name().to_string(),
        initial_response: Some(Authenticator::xoauth2_initial_response(username, access_token)),
    };
    let response = transport.send_command(&command).await?;
    if response.code == codes::AUTH_SUCCESS {
        return Ok(());
    }
    if response.code != codes::AUTH_CONTINUE {
        return Err(response.to_error());
    }

    let challenge = response.first_message().to_string();
    let response = transport
        .send_command(&SmtpCommand::AuthResponse(String::new()))
        .await?;
    if response.code == codes::AUTH_SUCCESS {
        return Err(SinkError::authentication(format!(
            "XOAUTH2 completed after an error challenge: {}",
            challenge
        )));
    }
    Err(response.to_error())
}

fn expect_auth_success(code: u16, error: impl FnOnce() -> SinkError) -> SinkResult<()> {
    if code == codes::AUTH_SUCCESS {
        Ok(())
    } else {
        Err(error())
    }
}

/// Builder for [`EmailTransport`].
#[derive(Debug)]
pub struct EmailTransportBuilder {
    config: TransportConfig,
    connector: Option<Arc<dyn SmtpConnector>>,
    exchanger: Option<TokenExchanger>,
    message_id_domain: Option<String>,
}

impl EmailTransportBuilder {
    /// Starts from a configuration.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            connector: None,
            exchanger: None,
            message_id_domain: None,
        }
    }

    /// Uses a custom connector.
    pub fn connector(mut self, connector: Arc<dyn SmtpConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses a custom token exchanger.
    pub fn token_exchanger(mut self, exchanger: TokenExchanger) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Domain used in generated Message-IDs. Defaults to the client name.
    pub fn message_id_domain(mut self, domain: impl Into<String>) -> Self {
        self.message_id_domain = Some(domain.into());
        self
    }

    /// Builds the transport.
    pub fn build(self) -> SinkResult<EmailTransport> {
        self.config.validate()?;

        let exchanger = match self.exchanger {
            Some(exchanger) => exchanger,
            None => TokenExchanger::new()?,
        };
        let message_id_domain = self
            .message_id_domain
            .unwrap_or_else(|| self.config.client_name.clone());

        Ok(EmailTransport {
            tls: TlsSettings::from_config(&self.config),
            config: Arc::new(self.config),
            connector: self.connector.unwrap_or_else(|| Arc::new(TcpConnector)),
            exchanger,
            message_id_domain,
        })
    }
}
