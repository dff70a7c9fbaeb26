//! Outbound transport — the single channel messages are delivered through.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport as LettreSmtp, Transport as _};
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::TransportError;
use crate::notify::message::OutboundMessage;

/// Implicit-TLS submission port; every other port uses STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Something that can deliver an [`OutboundMessage`].
///
/// Returns a delivery id on success.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<String, TransportError>;
}

/// SMTP transport via lettre. Each send runs on a blocking thread.
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_email(&self, message: &OutboundMessage) -> Result<Message, TransportError> {
        let from: Mailbox = parse_mailbox(&self.config.from_address)?;
        let to: Mailbox = parse_mailbox(&message.recipient)?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .body(message.body.clone())
            .map_err(|e| TransportError::Build(e.to_string()))
    }

    fn send_blocking(config: &SmtpConfig, email: &Message) -> Result<String, TransportError> {
        let builder = if config.port == SMTPS_PORT {
            LettreSmtp::relay(&config.host)
        } else {
            LettreSmtp::starttls_relay(&config.host)
        }
        .map_err(|e| TransportError::SendFailed(format!("SMTP relay error: {e}")))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ))
            .build();

        let response = transport
            .send(email)
            .map_err(|e| TransportError::SendFailed(format!("SMTP send failed: {e}")))?;

        let lines: Vec<String> = response.message().map(|line| line.to_string()).collect();
        Ok(lines.join(" "))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<String, TransportError> {
        let email = self.build_email(message)?;
        let config = self.config.clone();

        let server_reply = tokio::task::spawn_blocking(move || Self::send_blocking(&config, &email))
            .await
            .map_err(|e| TransportError::SendFailed(format!("SMTP task failed: {e}")))??;

        tracing::info!(
            message_id = %message.id,
            to = %message.recipient,
            reply = %server_reply,
            "Email sent"
        );
        Ok(format!("{}:{}", message.id, server_reply))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| TransportError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}
