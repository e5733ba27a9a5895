//! Dispatch loop: fetch a batch of approved tasks and push each one
//! through rate limiting, connection lookup and a single send.
//!
//! Tasks run sequentially in fetch order. Each task is claimed before any
//! work so overlapping runs never send it twice. A task's failure is
//! recorded on the task and in the summary; only the initial fetch can fail
//! the run.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::{OutboundMessage, SenderRegistry};
use crate::config::DispatchConfig;
use crate::dispatch::log::ExecutionLog;
use crate::dispatch::model::{
    Channel, DispatchOutcome, DispatchRequest, ExecutionSummary, OutreachTask, SkipReason,
    TaskDetail, TaskFilter, TaskUpdate,
};
use crate::dispatch::rate_limit::{CountPolicy, RateLimiter, Reservation};
use crate::error::DispatchError;
use crate::store::Database;

/// Runs dispatch batches against the store and the registered senders.
pub struct Dispatcher {
    db: Arc<dyn Database>,
    registry: Arc<SenderRegistry>,
    limiter: Arc<RateLimiter>,
    log: ExecutionLog,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        db: Arc<dyn Database>,
        registry: Arc<SenderRegistry>,
        limiter: Arc<RateLimiter>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            log: ExecutionLog::new(db.clone()),
            db,
            registry,
            limiter,
            config,
        }
    }

    /// Validate a request and turn it into a fetch filter.
    fn filter(&self, request: &DispatchRequest) -> Result<TaskFilter, DispatchError> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(DispatchError::InvalidRequest("user_id is required".into()));
        }

        let mut channels: Vec<Channel> = Vec::new();
        for raw in request.channels.iter().flatten() {
            let channel: Channel = raw.parse().map_err(DispatchError::InvalidRequest)?;
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        let limit = request
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));

        let campaign_id = request
            .campaign_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from);

        Ok(TaskFilter {
            user_id: user_id.to_string(),
            campaign_id,
            channels,
            limit,
        })
    }

    /// Execute one dispatch run.
    pub async fn run(&self, request: DispatchRequest) -> Result<ExecutionSummary, DispatchError> {
        let filter = self.filter(&request)?;
        let run_id = Uuid::new_v4();

        info!(
            %run_id,
            user_id = %filter.user_id,
            campaign_id = ?filter.campaign_id,
            channels = ?filter.channels,
            limit = filter.limit,
            "Dispatch run starting"
        );

        let tasks = self
            .db
            .fetch_approved_unsent(&filter)
            .await
            .map_err(DispatchError::Fetch)?;

        let mut summary = ExecutionSummary::new(run_id);
        for task in &tasks {
            match self.db.claim_task(task.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(%run_id, task_id = %task.id, "Task claimed by another run");
                    continue;
                }
                Err(e) => {
                    warn!(%run_id, task_id = %task.id, "Failed to claim task, leaving it for a later run: {e}");
                    continue;
                }
            }

            let (update, note) = self.process(task).await;

            match self.db.mark_task_status(task.id, &update).await {
                Ok(true) => {}
                Ok(false) => warn!(task_id = %task.id, "Task already terminal, status left unchanged"),
                Err(e) => warn!(task_id = %task.id, "Failed to record task status: {e}"),
            }

            let detail = task_detail(task, update, note);
            info!(
                %run_id,
                task_id = %task.id,
                channel = %task.channel,
                outcome = %detail.status,
                error = detail.error.as_deref().unwrap_or(""),
                "Task processed"
            );
            self.log.record(run_id, &task.user_id, &detail).await;
            summary.record(detail);
        }

        let summary = summary.finish();
        info!(
            %run_id,
            user_id = %filter.user_id,
            fetched = tasks.len(),
            sent = summary.sent,
            failed = summary.failed,
            skipped_rate_limit = summary.skipped_rate_limit,
            skipped_no_connection = summary.skipped_no_connection,
            "Dispatch run finished"
        );
        Ok(summary)
    }

    /// Take one task to its outcome for this run. Returns the status
    /// transition and the reason shown in the summary.
    async fn process(&self, task: &OutreachTask) -> (TaskUpdate, Option<String>) {
        let Some(sender) = self.registry.get(task.channel) else {
            return skipped(SkipReason::NoConnection, "no sender registered".into());
        };

        let reservation = match self.limiter.check_and_reserve(&task.user_id, task.channel).await
        {
            Ok(Some(reservation)) => reservation,
            Ok(None) => {
                return skipped(
                    SkipReason::RateLimit,
                    format!("daily {} limit reached", task.channel),
                );
            }
            Err(e) => {
                return skipped(
                    SkipReason::RateLimit,
                    format!("rate limit check failed: {e}"),
                );
            }
        };

        let connection = match sender.connection(&task.user_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                self.release(&reservation).await;
                return skipped(
                    SkipReason::NoConnection,
                    format!("no active {} connection", task.channel),
                );
            }
            Err(e) => {
                self.release(&reservation).await;
                return skipped(SkipReason::NoConnection, e.to_string());
            }
        };

        debug!(task_id = %task.id, connection = connection.label(), "Sending");
        let message = OutboundMessage::from_task(task);
        match sender.send(&connection, &message).await {
            Ok(receipt) => (
                TaskUpdate::Sent {
                    provider_message_id: receipt.provider_message_id,
                },
                None,
            ),
            Err(e) => {
                if self.config.count_policy == CountPolicy::Deliveries {
                    self.release(&reservation).await;
                }
                failed(e.to_string())
            }
        }
    }

    async fn release(&self, reservation: &Reservation) {
        if let Err(e) = self.limiter.release(reservation).await {
            warn!(
                user_id = %reservation.user_id,
                channel = %reservation.channel,
                "Failed to release send slot: {e}"
            );
        }
    }
}

fn skipped(reason: SkipReason, note: String) -> (TaskUpdate, Option<String>) {
    (TaskUpdate::Skipped { reason }, Some(note))
}

fn failed(error: String) -> (TaskUpdate, Option<String>) {
    (
        TaskUpdate::Failed {
            error: error.clone(),
        },
        Some(error),
    )
}

fn task_detail(task: &OutreachTask, update: TaskUpdate, note: Option<String>) -> TaskDetail {
    let (status, provider_message_id) = match update {
        TaskUpdate::Sent {
            provider_message_id,
        } => (DispatchOutcome::Sent, provider_message_id),
        TaskUpdate::Failed { .. } => (DispatchOutcome::Failed, None),
        TaskUpdate::Skipped {
            reason: SkipReason::RateLimit,
        } => (DispatchOutcome::SkippedRateLimit, None),
        TaskUpdate::Skipped {
            reason: SkipReason::NoConnection,
        } => (DispatchOutcome::SkippedNoConnection, None),
    };

    TaskDetail {
        task_id: task.id,
        candidate_name: task.recipient.name.clone(),
        channel: task.channel,
        status,
        error: note,
        provider_message_id,
    }
}
