//! `ChannelSender` capability trait and the values that flow through it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::channels::compose;
use crate::dispatch::model::{Channel, OutreachTask, Recipient};
use crate::error::ChannelError;

/// Credentials resolved for one user before a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderConnection {
    /// Connected account at the hosted connector.
    Connector { account_id: String },
    /// Fallback transactional mail relay.
    Smtp,
    /// SMS sender number.
    Phone { from_number: String },
}

impl SenderConnection {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connector { .. } => "connector",
            Self::Smtp => "smtp",
            Self::Phone { .. } => "phone",
        }
    }
}

/// Normalized, placeholder-free message ready for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub task_id: Uuid,
    /// Sending user.
    pub user_id: String,
    pub channel: Channel,
    pub recipient: Recipient,
    pub subject: Option<String>,
    pub body: String,
}

impl OutboundMessage {
    /// Build from a task, interpolating `{{variables}}` in subject and body.
    pub fn from_task(task: &OutreachTask) -> Self {
        Self {
            task_id: task.id,
            user_id: task.user_id.clone(),
            channel: task.channel,
            recipient: task.recipient.clone(),
            subject: task
                .subject
                .as_deref()
                .map(|s| compose::interpolate(s, &task.recipient)),
            body: compose::interpolate(&task.content, &task.recipient),
        }
    }
}

/// Successful provider reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
}

impl DeliveryReceipt {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            provider_message_id: Some(id.into()),
        }
    }
}

/// One outbound channel.
///
/// The dispatch loop only talks to this trait, so adding a channel means
/// adding an implementation and registering it.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel served by this sender.
    fn channel(&self) -> Channel;

    /// Resolve the user's credentials. `None` means no active connection;
    /// the loop then skips the task without calling `send`.
    async fn connection(&self, user_id: &str) -> Result<Option<SenderConnection>, ChannelError>;

    /// Deliver one message with exactly one provider call.
    async fn send(
        &self,
        connection: &SenderConnection,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ChannelError>;
}
