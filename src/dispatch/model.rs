//! Outreach data model: tasks, channels, statuses, log entries, and run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Medium used to contact a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    LinkedIn,
    Email,
    Sms,
}

impl Channel {
    /// Every supported channel, in a stable order.
    pub const ALL: [Channel; 3] = [Channel::LinkedIn, Channel::Email, Channel::Sms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkedIn => "linkedin",
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linkedin" => Ok(Self::LinkedIn),
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

/// Review state set by campaign planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown approval status: {}", s)),
        }
    }
}

/// Delivery state of a task.
///
/// `Sent` and `Failed` are terminal. `Skipped` tasks stay eligible for later runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Pending,
    /// Claimed by a run that has not recorded its outcome yet.
    Sending,
    Sent,
    Failed,
    Skipped,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl std::str::FromStr for SendStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Unknown send status: {}", s)),
        }
    }
}

/// Why a task was skipped in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RateLimit,
    NoConnection,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::NoConnection => "no_connection",
        }
    }
}

impl std::str::FromStr for SkipReason {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate_limit" => Ok(Self::RateLimit),
            "no_connection" => Ok(Self::NoConnection),
            _ => Err(format!("Unknown skip reason: {}", s)),
        }
    }
}

/// Contact details of the candidate being reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl Recipient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_linkedin(mut self, url: impl Into<String>) -> Self {
        self.linkedin_url = Some(url.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// First whitespace-separated token of the name.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }
}

/// One planned contact attempt to a candidate on a specific channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachTask {
    pub id: Uuid,
    /// User whose connections and daily quota apply.
    pub user_id: String,
    pub campaign_id: String,
    pub candidate_id: String,
    pub channel: Channel,
    /// Message body, possibly containing `{{placeholders}}`.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub recipient: Recipient,
    pub approval_status: ApprovalStatus,
    pub send_status: SendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Number of dispatch runs that picked this task up.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutreachTask {
    /// Create a pending, not-yet-approved task.
    pub fn new(
        user_id: impl Into<String>,
        campaign_id: impl Into<String>,
        candidate_id: impl Into<String>,
        channel: Channel,
        content: impl Into<String>,
        recipient: Recipient,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            campaign_id: campaign_id.into(),
            candidate_id: candidate_id.into(),
            channel,
            content: content.into(),
            subject: None,
            recipient,
            approval_status: ApprovalStatus::Pending,
            send_status: SendStatus::Pending,
            skip_reason: None,
            attempts: 0,
            last_error: None,
            provider_message_id: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: mark as approved for sending.
    pub fn approved(mut self) -> Self {
        self.approval_status = ApprovalStatus::Approved;
        self
    }

    /// Builder: set an explicit subject line.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Builder: override the creation time (controls fetch order).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}

/// Status transition applied to a task after a dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskUpdate {
    Sent { provider_message_id: Option<String> },
    Failed { error: String },
    Skipped { reason: SkipReason },
}

impl TaskUpdate {
    pub fn send_status(&self) -> SendStatus {
        match self {
            Self::Sent { .. } => SendStatus::Sent,
            Self::Failed { .. } => SendStatus::Failed,
            Self::Skipped { .. } => SendStatus::Skipped,
        }
    }
}

/// Outcome of one task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Failed,
    SkippedRateLimit,
    SkippedNoConnection,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::SkippedRateLimit => "skipped_rate_limit",
            Self::SkippedNoConnection => "skipped_no_connection",
        }
    }
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DispatchOutcome {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped_rate_limit" => Ok(Self::SkippedRateLimit),
            "skipped_no_connection" => Ok(Self::SkippedNoConnection),
            _ => Err(format!("Unknown dispatch outcome: {}", s)),
        }
    }
}

/// Per-task line of an execution summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task_id: Uuid,
    pub candidate_name: String,
    pub channel: Channel,
    pub status: DispatchOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

/// Aggregate result of one dispatch run. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub run_id: Uuid,
    pub sent: usize,
    pub failed: usize,
    pub skipped_rate_limit: usize,
    pub skipped_no_connection: usize,
    pub details: Vec<TaskDetail>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            sent: 0,
            failed: 0,
            skipped_rate_limit: 0,
            skipped_no_connection: 0,
            details: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Count a task outcome and keep its detail line.
    pub fn record(&mut self, detail: TaskDetail) {
        match detail.status {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::SkippedRateLimit => self.skipped_rate_limit += 1,
            DispatchOutcome::SkippedNoConnection => self.skipped_no_connection += 1,
        }
        self.details.push(detail);
    }

    /// Number of tasks processed in the run.
    pub fn total(&self) -> usize {
        self.sent + self.failed + self.skipped_rate_limit + self.skipped_no_connection
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Immutable audit row for one dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub candidate_name: String,
    pub channel: Channel,
    pub status: DispatchOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn from_detail(run_id: Uuid, user_id: &str, detail: &TaskDetail) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            task_id: detail.task_id,
            user_id: user_id.to_string(),
            candidate_name: detail.candidate_name.clone(),
            channel: detail.channel,
            status: detail.status,
            error: detail.error.clone(),
            provider_message_id: detail.provider_message_id.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Invocation payload of a dispatch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
}

impl DispatchRequest {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_channels(mut self, channels: &[Channel]) -> Self {
        self.channels = Some(channels.iter().map(|c| c.as_str().to_string()).collect());
        self
    }
}

/// Query used to fetch eligible tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub user_id: String,
    pub campaign_id: Option<String>,
    /// Empty means every channel.
    pub channels: Vec<Channel>,
    pub limit: usize,
}
