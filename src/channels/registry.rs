//! Channel → sender lookup, fixed at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::channels::composio::ComposioClient;
use crate::channels::email::{EmailSender, SmtpMailer};
use crate::channels::linkedin::LinkedInSender;
use crate::channels::retry::{RetryPolicy, RetryingSender};
use crate::channels::sender::ChannelSender;
use crate::channels::sms::SmsSender;
use crate::config::{ComposioConfig, RetryConfig, SmtpConfig, TwilioConfig};
use crate::dispatch::model::Channel;
use crate::store::Database;

/// Registry of outbound senders, one per channel.
#[derive(Default)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender under the channel it reports. Replaces any
    /// sender already registered for that channel.
    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        let channel = sender.channel();
        if self.senders.insert(channel, sender).is_some() {
            tracing::warn!(%channel, "Replaced existing sender registration");
        } else {
            tracing::debug!(%channel, "Registered sender");
        }
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }

    /// Registered channels, in `Channel::ALL` order.
    pub fn channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.senders.contains_key(c))
            .collect()
    }

    /// Build the production registry from provider settings.
    ///
    /// LinkedIn needs the connector. Email needs the connector or the SMTP
    /// relay. SMS is always registered; without credentials it resolves
    /// every user to no connection.
    pub fn from_config(
        db: Arc<dyn Database>,
        composio: Option<ComposioConfig>,
        smtp: Option<SmtpConfig>,
        twilio: Option<TwilioConfig>,
        retry: RetryConfig,
    ) -> Self {
        let composio = composio.map(|c| Arc::new(ComposioClient::new(c)));
        let smtp = smtp.map(|c| Arc::new(SmtpMailer::new(c)));

        let mut senders: Vec<Arc<dyn ChannelSender>> = Vec::new();
        if let Some(client) = &composio {
            senders.push(Arc::new(LinkedInSender::new(db.clone(), client.clone())));
        }
        if composio.is_some() || smtp.is_some() {
            senders.push(Arc::new(EmailSender::new(db.clone(), composio.clone(), smtp)));
        }
        senders.push(Arc::new(SmsSender::new(db, twilio)));

        let mut registry = Self::new();
        for sender in senders {
            if retry.enabled() {
                registry.register(Arc::new(RetryingSender::new(
                    sender,
                    RetryPolicy::from(retry),
                )));
            } else {
                registry.register(sender);
            }
        }

        tracing::info!(channels = ?registry.channels(), "Sender registry ready");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use secrecy::SecretString;
    use std::time::Duration;

    fn composio() -> ComposioConfig {
        ComposioConfig {
            api_key: SecretString::from("ck".to_string()),
            base_url: "http://127.0.0.1:1".into(),
            linkedin_action: "LINKEDIN_SEND_MESSAGE".into(),
            email_action: "GMAIL_SEND_EMAIL".into(),
        }
    }

    fn smtp() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "ops@example.com".into(),
            password: SecretString::from("pw".to_string()),
            from_address: "ops@example.com".into(),
        }
    }

    async fn db() -> Arc<LibSqlBackend> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    #[tokio::test]
    async fn all_channels_with_connector() {
        let registry = SenderRegistry::from_config(
            db().await,
            Some(composio()),
            None,
            None,
            RetryConfig::default(),
        );
        assert_eq!(registry.channels(), Channel::ALL.to_vec());
    }

    #[tokio::test]
    async fn relay_alone_enables_email_but_not_linkedin() {
        let registry =
            SenderRegistry::from_config(db().await, None, Some(smtp()), None, RetryConfig::default());
        assert_eq!(registry.channels(), vec![Channel::Email, Channel::Sms]);
        assert!(registry.get(Channel::LinkedIn).is_none());
    }

    #[tokio::test]
    async fn retry_wrapper_keeps_channel() {
        let registry = SenderRegistry::from_config(
            db().await,
            Some(composio()),
            None,
            None,
            RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            },
        );
        let sender = registry.get(Channel::LinkedIn).unwrap();
        assert_eq!(sender.channel(), Channel::LinkedIn);
    }

    #[tokio::test]
    async fn register_replaces_by_channel() {
        let db = db().await;
        let mut registry = SenderRegistry::new();
        registry.register(Arc::new(SmsSender::new(db.clone(), None)));
        registry.register(Arc::new(SmsSender::new(db, None)));
        assert_eq!(registry.channels(), vec![Channel::Sms]);
    }
}
