//! [`DeliveryClient`] that submits each message to a single SMTP relay.

use std::{fmt, future::Future, time::Duration};

use async_trait::async_trait;
use maple_common::{
    config::{RelayTimeouts, TlsConfig},
    relay,
};
use maple_smtp::{BodyKind, ClientError, MessageBuilder, SmtpClient};
use serde::{Deserialize, Serialize};

use crate::{
    client::{DeliveryClient, OutboundMessage},
    error::DeliveryError,
    template::HtmlLayout,
};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay host name; also the name its certificate is checked against.
    #[serde(default = "defaults::host")]
    pub host: String,

    /// Default: 587 (submission)
    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default)]
    pub tls: TlsConfig,

    /// AUTH is skipped when absent.
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Envelope and header sender address.
    #[serde(default = "defaults::sender")]
    pub sender: String,

    /// Display name in the `From` header.
    #[serde(default)]
    pub sender_name: Option<String>,

    /// Name announced in EHLO.
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,

    #[serde(default)]
    pub timeouts: RelayTimeouts,

    #[serde(default)]
    pub layout: HtmlLayout,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            tls: TlsConfig::default(),
            credentials: None,
            sender: defaults::sender(),
            sender_name: None,
            helo_name: defaults::helo_name(),
            timeouts: RelayTimeouts::default(),
            layout: HtmlLayout::default(),
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    config: RelayConfig,
}

impl RelayClient {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        if config.tls.accept_invalid_certs {
            tracing::warn!(
                relay = %config.address(),
                "SECURITY WARNING: TLS certificate validation is disabled for the relay"
            );
        }
        if config.credentials.is_some() && !config.tls.is_required() && !config.tls.is_implicit() {
            tracing::warn!(
                relay = %config.address(),
                policy = ?config.tls.policy,
                "Relay credentials may be sent without TLS"
            );
        }

        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn compose(&self, message: &OutboundMessage) -> Result<String, DeliveryError> {
        let mut builder = MessageBuilder::new()
            .from(&self.config.sender)
            .to(&message.recipient)
            .subject(&message.subject)
            .body(self.config.layout.render(&message.body), BodyKind::Html);

        if let Some(name) = &self.config.sender_name {
            builder = builder.from_name(name);
        }

        Ok(builder.build()?)
    }

    async fn connect(&self) -> Result<SmtpClient, DeliveryError> {
        let address = self.config.address();
        let tls = self.config.tls;
        let limit = self.config.timeouts.connect();

        let connecting = async {
            if tls.is_implicit() {
                SmtpClient::connect_tls(&address, self.config.host.as_str(), tls.accept_invalid_certs)
                    .await
            } else {
                SmtpClient::connect(&address, self.config.host.as_str())
                    .await
                    .map(|client| client.accept_invalid_certs(tls.accept_invalid_certs))
            }
        };

        tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| DeliveryError::Timeout(format!("Connecting to {address} after {limit:?}")))?
            .map_err(|e| match e {
                ClientError::TlsError(e) => DeliveryError::Tls(e),
                e => DeliveryError::Connection(format!("Failed to connect to {address}: {e}")),
            })
    }

    async fn ehlo(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        step(
            "EHLO",
            self.config.timeouts.command(),
            client.ehlo(&self.config.helo_name),
        )
        .await?
        .expect_code("EHLO", 250)?;
        Ok(())
    }

    /// Everything between connecting and QUIT.
    async fn transaction(
        &self,
        client: &mut SmtpClient,
        recipient: &str,
        data: &str,
    ) -> Result<(), DeliveryError> {
        let command = self.config.timeouts.command();
        let tls = self.config.tls;

        step("greeting", command, client.read_greeting())
            .await?
            .expect_code("greeting", 220)?;
        self.ehlo(client).await?;

        if !client.is_tls() && tls.wants_starttls() {
            if client.capabilities().starttls() {
                step("STARTTLS", command, client.starttls())
                    .await
                    .map_err(|e| match e {
                        DeliveryError::Rejected { code, message } => {
                            DeliveryError::Tls(format!("STARTTLS refused: {code} {message}"))
                        }
                        e => e,
                    })?;
                self.ehlo(client).await?;
            } else if tls.is_required() {
                return Err(DeliveryError::Tls(
                    "Relay does not advertise STARTTLS".to_string(),
                ));
            } else {
                relay!(level = DEBUG, "Relay does not advertise STARTTLS, continuing in plaintext");
            }
        }

        if let Some(credentials) = &self.config.credentials {
            step(
                "AUTH",
                command,
                client.authenticate(&credentials.username, &credentials.password),
            )
            .await?;
        }

        step("MAIL FROM", command, client.mail_from(&self.config.sender))
            .await?
            .expect_code("MAIL FROM", 250)?;

        let rcpt = step("RCPT TO", command, client.rcpt_to(recipient)).await?;
        if !matches!(rcpt.code, 250 | 251) {
            return Err(DeliveryError::Rejected {
                code: rcpt.code,
                message: rcpt.message(),
            });
        }

        step("DATA", command, client.data())
            .await?
            .expect_code("DATA", 354)?;

        step("message", self.config.timeouts.data(), client.send_data(data))
            .await?
            .expect_code("message", 250)?;

        Ok(())
    }

    async fn quit(&self, client: &mut SmtpClient) {
        let limit = self.config.timeouts.quit();
        match tokio::time::timeout(limit, client.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => relay!(level = DEBUG, error = %e, "QUIT failed"),
            Err(_) => relay!(level = DEBUG, "QUIT timed out after {limit:?}"),
        }
    }
}

#[async_trait]
impl DeliveryClient for RelayClient {
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(relay = %self.config.address(), recipient = %message.recipient)
    )]
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let data = self.compose(message)?;
        let mut client = self.connect().await?;

        let result = self
            .transaction(&mut client, &message.recipient, &data)
            .await;
        self.quit(&mut client).await;

        result
    }
}

/// Run one protocol step under its deadline.
async fn step<T>(
    stage: &str,
    limit: Duration,
    fut: impl Future<Output = maple_smtp::Result<T>> + Send,
) -> Result<T, DeliveryError> {
    Ok(tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DeliveryError::Timeout(format!("{stage} after {limit:?}")))??)
}

mod defaults {
    pub fn host() -> String {
        "localhost".to_string()
    }

    pub const fn port() -> u16 {
        587
    }

    pub fn sender() -> String {
        "noreply@localhost".to_string()
    }

    pub fn helo_name() -> String {
        "localhost".to_string()
    }
}
