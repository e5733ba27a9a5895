//! LinkedIn sender: direct messages through the hosted connector.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::channels::composio::ComposioClient;
use crate::channels::sender::{ChannelSender, DeliveryReceipt, OutboundMessage, SenderConnection};
use crate::dispatch::model::Channel;
use crate::error::ChannelError;
use crate::store::{ConnectionProvider, Database};

pub struct LinkedInSender {
    db: Arc<dyn Database>,
    composio: Arc<ComposioClient>,
}

impl LinkedInSender {
    pub fn new(db: Arc<dyn Database>, composio: Arc<ComposioClient>) -> Self {
        Self { db, composio }
    }
}

#[async_trait]
impl ChannelSender for LinkedInSender {
    fn channel(&self) -> Channel {
        Channel::LinkedIn
    }

    async fn connection(&self, user_id: &str) -> Result<Option<SenderConnection>, ChannelError> {
        let connection = self
            .db
            .get_active_connection(user_id, Channel::LinkedIn)
            .await?
            .filter(|c| c.provider == ConnectionProvider::Composio);

        Ok(connection.map(|c| SenderConnection::Connector {
            account_id: c.account_ref,
        }))
    }

    async fn send(
        &self,
        connection: &SenderConnection,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let SenderConnection::Connector { account_id } = connection else {
            return Err(ChannelError::NotConfigured {
                name: "linkedin".into(),
                reason: format!("unsupported connection kind: {}", connection.label()),
            });
        };

        let profile_url = message
            .recipient
            .linkedin_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ChannelError::InvalidRecipient {
                name: "linkedin".into(),
                reason: format!("{} has no LinkedIn profile URL", message.recipient.name),
            })?;

        let receipt = self
            .composio
            .execute(
                Channel::LinkedIn,
                self.composio.linkedin_action(),
                account_id,
                json!({
                    "recipient_profile_url": profile_url,
                    "message": message.body,
                }),
            )
            .await?;

        if let Err(e) = self
            .db
            .touch_connection(&message.user_id, Channel::LinkedIn)
            .await
        {
            warn!(user_id = %message.user_id, "Failed to update connection last_used_at: {e}");
        }

        Ok(receipt)
    }
}
