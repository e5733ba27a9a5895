//! Configuration types, built from environment variables.
//!
//! Each section has a `from_lookup` constructor taking a key → value
//! function so tests can supply values without touching the process
//! environment; `from_env` wires it to `std::env::var`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use tracing_subscriber::{EnvFilter, fmt};

use crate::dispatch::model::Channel;
use crate::dispatch::rate_limit::CountPolicy;
use crate::error::ConfigError;

/// Default connector API base.
pub const DEFAULT_COMPOSIO_BASE_URL: &str = "https://backend.composio.dev/api/v1";
/// Default SMS provider API base.
pub const DEFAULT_TWILIO_BASE_URL: &str = "https://api.twilio.com";
/// Every minute, at second 0.
pub const DEFAULT_DISPATCH_SCHEDULE: &str = "0 * * * * *";

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a numeric value, falling back to `default` when absent or malformed.
fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|s| s.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

// ── Logging ─────────────────────────────────────────────────────────

/// Tracing subscriber settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl LoggingConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            level: lookup("LOG_LEVEL").unwrap_or(defaults.level),
            format: lookup("LOG_FORMAT")
                .map(|s| s.trim().to_ascii_lowercase())
                .unwrap_or(defaults.format),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Install the global tracing subscriber. `RUST_LOG` overrides `level`.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => fmt().json().with_env_filter(filter).init(),
            _ => fmt().with_env_filter(filter).with_target(false).init(),
        }
    }
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Batch sizing and quota accounting for dispatch runs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Batch size when the request carries no `limit`.
    pub default_limit: usize,
    /// Upper bound applied to any requested `limit`.
    pub max_limit: usize,
    pub count_policy: CountPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 50,
            count_policy: CountPolicy::Attempts,
        }
    }
}

impl DispatchConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_limit = parse_or(&lookup, "DISPATCH_MAX_LIMIT", defaults.max_limit).max(1);
        let default_limit = parse_or(&lookup, "DISPATCH_DEFAULT_LIMIT", defaults.default_limit)
            .clamp(1, max_limit);

        let count_policy = match lookup("RATE_LIMIT_COUNT_POLICY") {
            Some(raw) => raw
                .parse()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "RATE_LIMIT_COUNT_POLICY".into(),
                    message,
                })?,
            None => defaults.count_policy,
        };

        Ok(Self {
            default_limit,
            max_limit,
            count_policy,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }
}

// ── Rate limits ─────────────────────────────────────────────────────

/// Daily per-user send caps, one per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub linkedin_daily: u32,
    pub email_daily: u32,
    pub sms_daily: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            linkedin_daily: 25,
            email_daily: 50,
            sms_daily: 50,
        }
    }
}

impl RateLimitConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            linkedin_daily: parse_or(&lookup, "RATE_LIMIT_LINKEDIN_DAILY", defaults.linkedin_daily),
            email_daily: parse_or(&lookup, "RATE_LIMIT_EMAIL_DAILY", defaults.email_daily),
            sms_daily: parse_or(&lookup, "RATE_LIMIT_SMS_DAILY", defaults.sms_daily),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Cap for one channel.
    pub fn cap_for(&self, channel: Channel) -> u32 {
        match channel {
            Channel::LinkedIn => self.linkedin_daily,
            Channel::Email => self.email_daily,
            Channel::Sms => self.sms_daily,
        }
    }
}

// ── Providers ───────────────────────────────────────────────────────

/// Hosted connector used for LinkedIn and Gmail sends.
#[derive(Debug)]
pub struct ComposioConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub linkedin_action: String,
    pub email_action: String,
}

impl ComposioConfig {
    /// Returns `None` if `COMPOSIO_API_KEY` is not set (connector disabled).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = lookup("COMPOSIO_API_KEY")?;
        Some(Self {
            api_key: SecretString::from(api_key),
            base_url: lookup("COMPOSIO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_COMPOSIO_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            linkedin_action: lookup("COMPOSIO_LINKEDIN_ACTION")
                .unwrap_or_else(|| "LINKEDIN_SEND_MESSAGE".into()),
            email_action: lookup("COMPOSIO_EMAIL_ACTION")
                .unwrap_or_else(|| "GMAIL_SEND_EMAIL".into()),
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(env_lookup)
    }
}

/// Fallback transactional mail relay.
#[derive(Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Returns `None` if `SMTP_HOST` is not set (no fallback).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let host = lookup("SMTP_HOST")?;
        let username = lookup("SMTP_USERNAME").unwrap_or_default();
        Some(Self {
            host,
            port: parse_or(&lookup, "SMTP_PORT", 587),
            from_address: lookup("SMTP_FROM_ADDRESS").unwrap_or_else(|| username.clone()),
            username,
            password: SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default()),
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(env_lookup)
    }
}

/// SMS provider credentials.
#[derive(Debug)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Sender number used when the user has no number of their own.
    pub from_number: Option<String>,
    pub base_url: String,
}

impl TwilioConfig {
    /// Returns `None` unless both `TWILIO_ACCOUNT_SID` and `TWILIO_AUTH_TOKEN` are set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let account_sid = lookup("TWILIO_ACCOUNT_SID")?;
        let auth_token = lookup("TWILIO_AUTH_TOKEN")?;
        Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            from_number: lookup("TWILIO_FROM_NUMBER"),
            base_url: lookup("TWILIO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TWILIO_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(env_lookup)
    }
}

/// Provider-level retries around each send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            max_retries: parse_or(&lookup, "SEND_RETRY_ATTEMPTS", 0),
            base_delay: Duration::from_millis(parse_or(&lookup, "SEND_RETRY_BASE_MS", 500)),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn enabled(&self) -> bool {
        self.max_retries > 0
    }
}

// ── Server & scheduler ──────────────────────────────────────────────

/// HTTP surface settings.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// When set, every `/api` request must carry `Authorization: Bearer <key>`.
    pub service_key: Option<SecretString>,
    /// CORS allow-list; empty means no cross-origin access.
    pub allowed_origins: Vec<String>,
    pub db_path: PathBuf,
}

impl ServerConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let allowed_origins = lookup("OUTREACH_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            port: parse_or(&lookup, "OUTREACH_PORT", 8080),
            service_key: lookup("OUTREACH_SERVICE_KEY").map(SecretString::from),
            allowed_origins,
            db_path: lookup("OUTREACH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/outreach.db")),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }
}

/// Periodic dispatch settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub schedule: cron::Schedule,
}

impl SchedulerConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let expr = lookup("DISPATCH_SCHEDULE").unwrap_or_else(|| DEFAULT_DISPATCH_SCHEDULE.into());
        let schedule = cron::Schedule::from_str(&expr).map_err(|e| ConfigError::InvalidValue {
            key: "DISPATCH_SCHEDULE".into(),
            message: format!("{expr:?}: {e}"),
        })?;

        Ok(Self {
            enabled: parse_bool(&lookup, "DISPATCH_SCHEDULER_ENABLED", true),
            schedule,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }
}

// ── Aggregate ───────────────────────────────────────────────────────

/// Everything the binary needs at startup.
#[derive(Debug)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub dispatch: DispatchConfig,
    pub rate_limits: RateLimitConfig,
    pub composio: Option<ComposioConfig>,
    pub smtp: Option<SmtpConfig>,
    pub twilio: Option<TwilioConfig>,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            logging: LoggingConfig::from_lookup(&lookup),
            dispatch: DispatchConfig::from_lookup(&lookup)?,
            rate_limits: RateLimitConfig::from_lookup(&lookup),
            composio: ComposioConfig::from_lookup(&lookup),
            smtp: SmtpConfig::from_lookup(&lookup),
            twilio: TwilioConfig::from_lookup(&lookup),
            retry: RetryConfig::from_lookup(&lookup),
            server: ServerConfig::from_lookup(&lookup),
            scheduler: SchedulerConfig::from_lookup(&lookup)?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }
}
