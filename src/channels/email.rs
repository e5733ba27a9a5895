//! Email sender: Gmail through the hosted connector, with an SMTP relay
//! (lettre) as the fallback transactional path.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channels::compose;
use crate::channels::composio::ComposioClient;
use crate::channels::sender::{ChannelSender, DeliveryReceipt, OutboundMessage, SenderConnection};
use crate::config::SmtpConfig;
use crate::dispatch::model::Channel;
use crate::error::ChannelError;
use crate::store::{ConnectionProvider, Database};

// ── SMTP relay ──────────────────────────────────────────────────────

/// Blocking SMTP client used off the async runtime.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build the RFC 5322 message. Returns it with its Message-ID.
    fn build(&self, to: &str, subject: &str, body: &str) -> Result<(Message, String), ChannelError> {
        let message_id = format!("<{}@outreach-dispatch>", Uuid::new_v4());

        let email = Message::builder()
            .from(self.config.from_address.parse().map_err(|e| {
                ChannelError::NotConfigured {
                    name: "email".into(),
                    reason: format!("Invalid from address: {e}"),
                }
            })?)
            .to(to.parse().map_err(|e| ChannelError::InvalidRecipient {
                name: "email".into(),
                reason: format!("Invalid to address {to:?}: {e}"),
            })?)
            .subject(subject)
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| ChannelError::InvalidMessage {
                name: "email".into(),
                reason: format!("Failed to build email: {e}"),
            })?;

        Ok((email, message_id))
    }

    /// Send one message. Blocks on network I/O.
    fn send_blocking(&self, to: &str, subject: &str, body: &str) -> Result<String, ChannelError> {
        let (email, message_id) = self.build(to, subject, body)?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&self.config.host)
            .map_err(|e| ChannelError::NotConfigured {
                name: "email".into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(self.config.port)
            .credentials(creds)
            .build();

        transport.send(&email).map_err(|e| {
            if e.is_permanent() {
                ChannelError::Rejected {
                    name: "email".into(),
                    reason: format!("SMTP rejected message: {e}"),
                }
            } else if e.is_transient() {
                ChannelError::NotDelivered {
                    name: "email".into(),
                    reason: format!("SMTP deferred message: {e}"),
                }
            } else {
                ChannelError::SendFailed {
                    name: "email".into(),
                    reason: format!("SMTP send failed: {e}"),
                }
            }
        })?;

        Ok(message_id)
    }

    /// Send one message without blocking the runtime.
    pub async fn send(
        self: &Arc<Self>,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, ChannelError> {
        let mailer = Arc::clone(self);
        let (to, subject, body) = (to.to_string(), subject.to_string(), body.to_string());
        tokio::task::spawn_blocking(move || mailer.send_blocking(&to, &subject, &body))
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "email".into(),
                reason: format!("SMTP task panicked: {e}"),
            })?
    }
}

// ── Sender ──────────────────────────────────────────────────────────

pub struct EmailSender {
    db: Arc<dyn Database>,
    composio: Option<Arc<ComposioClient>>,
    smtp: Option<Arc<SmtpMailer>>,
}

impl EmailSender {
    pub fn new(
        db: Arc<dyn Database>,
        composio: Option<Arc<ComposioClient>>,
        smtp: Option<Arc<SmtpMailer>>,
    ) -> Self {
        Self { db, composio, smtp }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    /// The user's connector account when one is active, else the relay.
    async fn connection(&self, user_id: &str) -> Result<Option<SenderConnection>, ChannelError> {
        if self.composio.is_some()
            && let Some(conn) = self
                .db
                .get_active_connection(user_id, Channel::Email)
                .await?
                .filter(|c| c.provider == ConnectionProvider::Composio)
        {
            return Ok(Some(SenderConnection::Connector {
                account_id: conn.account_ref,
            }));
        }

        Ok(self.smtp.as_ref().map(|_| SenderConnection::Smtp))
    }

    async fn send(
        &self,
        connection: &SenderConnection,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let to = message
            .recipient
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ChannelError::InvalidRecipient {
                name: "email".into(),
                reason: format!("{} has no email address", message.recipient.name),
            })?;

        let parts = compose::email_parts(message.subject.as_deref(), &message.body);

        match connection {
            SenderConnection::Connector { account_id } => {
                let composio = self.composio.as_ref().ok_or_else(|| ChannelError::NotConfigured {
                    name: "email".into(),
                    reason: "connector client not configured".into(),
                })?;

                let receipt = composio
                    .execute(
                        Channel::Email,
                        composio.email_action(),
                        account_id,
                        json!({
                            "recipient_email": to,
                            "subject": parts.subject,
                            "body": parts.body,
                        }),
                    )
                    .await?;

                if let Err(e) = self.db.touch_connection(&message.user_id, Channel::Email).await {
                    warn!(user_id = %message.user_id, "Failed to update connection last_used_at: {e}");
                }
                Ok(receipt)
            }
            SenderConnection::Smtp => {
                let smtp = self.smtp.as_ref().ok_or_else(|| ChannelError::NotConfigured {
                    name: "email".into(),
                    reason: "SMTP relay not configured".into(),
                })?;
                let message_id = smtp.send(to, &parts.subject, &parts.body).await?;
                debug!(task_id = %message.task_id, %message_id, "Email sent via SMTP relay");
                Ok(DeliveryReceipt::with_id(message_id))
            }
            SenderConnection::Phone { .. } => Err(ChannelError::NotConfigured {
                name: "email".into(),
                reason: format!("unsupported connection kind: {}", connection.label()),
            }),
        }
    }
}
