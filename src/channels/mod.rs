//! Outbound channels: one sender per medium behind a common trait.

pub mod composio;
pub mod compose;
pub mod email;
pub mod linkedin;
pub mod registry;
pub mod retry;
pub mod sender;
pub mod sms;

pub use composio::ComposioClient;
pub use email::{EmailSender, SmtpMailer};
pub use linkedin::LinkedInSender;
pub use registry::SenderRegistry;
pub use retry::{RetryPolicy, RetryingSender};
pub use sender::{ChannelSender, DeliveryReceipt, OutboundMessage, SenderConnection};
pub use sms::SmsSender;

/// Timeout applied to every provider HTTP call.
pub(crate) const PROVIDER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Shared HTTP client for provider calls.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}

/// Classify a failed provider request.
///
/// Only a failed connect is known not to have reached the provider. Any
/// later failure, timeouts included, may follow a delivered message.
pub(crate) fn request_error(name: &str, e: reqwest::Error) -> crate::error::ChannelError {
    use crate::error::ChannelError;
    if e.is_connect() {
        ChannelError::NotDelivered {
            name: name.to_string(),
            reason: e.to_string(),
        }
    } else {
        ChannelError::SendFailed {
            name: name.to_string(),
            reason: e.to_string(),
        }
    }
}
