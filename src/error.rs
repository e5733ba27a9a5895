//! Error types for the outreach dispatch service.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by channel senders.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The send may or may not have reached the provider.
    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    /// The provider was never reached, or deferred the message; nothing
    /// was delivered.
    #[error("Channel {name} did not deliver: {reason}")]
    NotDelivered { name: String, reason: String },

    #[error("Could not build message for channel {name}: {reason}")]
    InvalidMessage { name: String, reason: String },

    #[error("Provider for channel {name} returned HTTP {status}: {body}")]
    Http {
        name: String,
        status: u16,
        body: String,
    },

    #[error("Channel {name} is not configured: {reason}")]
    NotConfigured { name: String, reason: String },

    #[error("Invalid recipient for channel {name}: {reason}")]
    InvalidRecipient { name: String, reason: String },

    #[error("Provider rejected message on channel {name}: {reason}")]
    Rejected { name: String, reason: String },

    #[error("Connection lookup failed: {0}")]
    Connection(#[from] DatabaseError),
}

impl ChannelError {
    /// Whether retrying the same call could succeed.
    ///
    /// Only failures known to have delivered nothing qualify: refused
    /// connections, provider 5xx and throttling. A send whose outcome is
    /// unknown (timeouts, dropped responses) is never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotDelivered { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::SendFailed { .. }
            | Self::InvalidMessage { .. }
            | Self::NotConfigured { .. }
            | Self::InvalidRecipient { .. }
            | Self::Rejected { .. }
            | Self::Connection(_) => false,
        }
    }
}

/// Errors that abort a whole dispatch run.
///
/// Per-task outcomes are never errors; they are recorded in the summary.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to fetch outreach tasks: {0}")]
    Fetch(#[source] DatabaseError),

    #[error("Invalid dispatch request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let refused = ChannelError::NotDelivered {
            name: "email".into(),
            reason: "connection refused".into(),
        };
        assert!(refused.is_transient());

        let unknown = ChannelError::SendFailed {
            name: "sms".into(),
            reason: "operation timed out".into(),
        };
        assert!(!unknown.is_transient());

        let malformed = ChannelError::InvalidMessage {
            name: "email".into(),
            reason: "missing body".into(),
        };
        assert!(!malformed.is_transient());

        let server = ChannelError::Http {
            name: "sms".into(),
            status: 503,
            body: "unavailable".into(),
        };
        assert!(server.is_transient());

        let throttled = ChannelError::Http {
            name: "sms".into(),
            status: 429,
            body: "slow down".into(),
        };
        assert!(throttled.is_transient());

        let bad_request = ChannelError::Http {
            name: "sms".into(),
            status: 400,
            body: "invalid To".into(),
        };
        assert!(!bad_request.is_transient());

        let recipient = ChannelError::InvalidRecipient {
            name: "linkedin".into(),
            reason: "missing profile url".into(),
        };
        assert!(!recipient.is_transient());

        let rejected = ChannelError::Rejected {
            name: "email".into(),
            reason: "mailbox unavailable".into(),
        };
        assert!(!rejected.is_transient());
    }

    #[test]
    fn http_error_message_includes_status_and_body() {
        let err = ChannelError::Http {
            name: "email".into(),
            status: 500,
            body: "internal error".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("internal error"));
    }
}
