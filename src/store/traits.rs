//! Unified `Database` trait: single async interface for all persistence.
//!
//! Covers the four collaborators of a dispatch run: the task store, the
//! connection registry, the daily send counters, and the execution log.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::model::{Channel, ExecutionLogEntry, OutreachTask, TaskFilter, TaskUpdate};
use crate::error::DatabaseError;

/// Third-party integration backing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionProvider {
    /// Hosted connector (LinkedIn, Gmail).
    Composio,
    /// Phone-number provider (SMS).
    Twilio,
}

impl ConnectionProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Composio => "composio",
            Self::Twilio => "twilio",
        }
    }
}

impl std::str::FromStr for ConnectionProvider {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "composio" => Ok(Self::Composio),
            "twilio" => Ok(Self::Twilio),
            _ => Err(format!("Unknown connection provider: {}", s)),
        }
    }
}

/// Lifecycle of a stored authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Inactive,
    Expired,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Unknown connection status: {}", s)),
        }
    }
}

/// A stored third-party authorization allowing sends on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConnection {
    pub user_id: String,
    pub channel: Channel,
    pub provider: ConnectionProvider,
    /// Connected-account id for the connector, or the sender phone number.
    pub account_ref: String,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelConnection {
    /// Create an active connection.
    pub fn active(
        user_id: impl Into<String>,
        channel: Channel,
        provider: ConnectionProvider,
        account_ref: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            channel,
            provider,
            account_ref: account_ref.into(),
            status: ConnectionStatus::Active,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filter for reading the execution log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a new outreach task.
    async fn insert_task(&self, task: &OutreachTask) -> Result<(), DatabaseError>;

    /// Get a task by ID.
    async fn get_task(&self, id: Uuid) -> Result<Option<OutreachTask>, DatabaseError>;

    /// Approved tasks whose send status is `pending` or `skipped`, oldest first.
    async fn fetch_approved_unsent(
        &self,
        filter: &TaskFilter,
    ) -> Result<Vec<OutreachTask>, DatabaseError>;

    /// Move an eligible task to `sending` so no other run picks it up.
    ///
    /// Returns `false` when the task is no longer eligible (claimed by
    /// another run, already terminal, or missing).
    async fn claim_task(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Mark every task left in `sending` as `failed`.
    ///
    /// Run at startup: a task left claimed by a stopped process may or may
    /// not have been delivered, so it is never sent again.
    async fn fail_interrupted_sends(&self) -> Result<usize, DatabaseError>;

    /// Apply a status transition and bump the attempt counter.
    ///
    /// Returns `false` when the task is missing or already terminal
    /// (`sent`/`failed`), in which case nothing changes.
    async fn mark_task_status(&self, id: Uuid, update: &TaskUpdate)
    -> Result<bool, DatabaseError>;

    /// Distinct owners of approved, unsent tasks.
    async fn list_users_with_eligible_tasks(&self) -> Result<Vec<String>, DatabaseError>;

    // ── Connections ─────────────────────────────────────────────────

    /// Insert or replace the connection for (user, channel).
    async fn upsert_connection(&self, connection: &ChannelConnection) -> Result<(), DatabaseError>;

    /// The active connection for (user, channel), if any.
    async fn get_active_connection(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<Option<ChannelConnection>, DatabaseError>;

    /// Whether (user, channel) has an active connection.
    async fn has_active_connection(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<bool, DatabaseError> {
        Ok(self.get_active_connection(user_id, channel).await?.is_some())
    }

    /// Change a connection's status. Returns `false` if none exists.
    async fn set_connection_status(
        &self,
        user_id: &str,
        channel: Channel,
        status: ConnectionStatus,
    ) -> Result<bool, DatabaseError>;

    /// Record that a connection was just used to send.
    async fn touch_connection(&self, user_id: &str, channel: Channel)
    -> Result<(), DatabaseError>;

    // ── Send counters ───────────────────────────────────────────────

    /// Atomically take one send slot for (user, channel, day) if the count
    /// is below `cap`. Returns whether the slot was granted.
    async fn reserve_send_slot(
        &self,
        user_id: &str,
        channel: Channel,
        day: NaiveDate,
        cap: u32,
    ) -> Result<bool, DatabaseError>;

    /// Give one slot back (never below zero).
    async fn release_send_slot(
        &self,
        user_id: &str,
        channel: Channel,
        day: NaiveDate,
    ) -> Result<(), DatabaseError>;

    /// Current count for (user, channel, day); zero when no row exists.
    async fn get_send_count(
        &self,
        user_id: &str,
        channel: Channel,
        day: NaiveDate,
    ) -> Result<u32, DatabaseError>;

    // ── Execution log ───────────────────────────────────────────────

    /// Append an audit row.
    async fn append_log_entry(&self, entry: &ExecutionLogEntry) -> Result<(), DatabaseError>;

    /// Read audit rows, newest first.
    async fn list_log_entries(
        &self,
        query: &LogQuery,
    ) -> Result<Vec<ExecutionLogEntry>, DatabaseError>;
}
