//! Provider-level retries for transient send failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::channels::sender::{ChannelSender, DeliveryReceipt, OutboundMessage, SenderConnection};
use crate::config::RetryConfig;
use crate::dispatch::model::Channel;
use crate::error::ChannelError;

/// Exponential backoff: `base_delay * multiplier^(attempt - 1)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-indexed), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * self.multiplier.powi(exp))
    }

    /// Backoff plus up to 25% random jitter.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        base + base.mul_f64(jitter)
    }
}

/// Wraps a sender and retries `send` on transient errors.
///
/// Connection lookups are never retried. Permanent errors (bad recipient,
/// 4xx replies, provider rejections) and sends with an unknown outcome
/// return immediately.
pub struct RetryingSender {
    inner: Arc<dyn ChannelSender>,
    policy: RetryPolicy,
}

impl RetryingSender {
    pub fn new(inner: Arc<dyn ChannelSender>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ChannelSender for RetryingSender {
    fn channel(&self) -> Channel {
        self.inner.channel()
    }

    async fn connection(&self, user_id: &str) -> Result<Option<SenderConnection>, ChannelError> {
        self.inner.connection(user_id).await
    }

    async fn send(
        &self,
        connection: &SenderConnection,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let mut attempt = 0;
        loop {
            match self.inner.send(connection, message).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.next_delay(attempt);
                    warn!(
                        task_id = %message.task_id,
                        channel = %message.channel,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient send failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
