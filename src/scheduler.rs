//! Periodic dispatch: on every cron tick, run one batch per user that has
//! approved, unsent tasks.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::store::Database;

/// Totals of one scheduled pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub users: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Run one batch per eligible user, sequentially, with the default limit.
///
/// A failing user run is logged and the pass moves on.
pub async fn run_scheduled_pass(dispatcher: &Dispatcher, db: &dyn Database) -> PassReport {
    let users = match db.list_users_with_eligible_tasks().await {
        Ok(users) => users,
        Err(e) => {
            error!("Scheduled dispatch could not list users: {e}");
            return PassReport::default();
        }
    };

    let mut report = PassReport::default();
    for user_id in users {
        match dispatcher.run(DispatchRequest::for_user(&user_id)).await {
            Ok(summary) => {
                report.users += 1;
                report.sent += summary.sent;
                report.failed += summary.failed;
                report.skipped += summary.skipped_rate_limit + summary.skipped_no_connection;
            }
            Err(e) => warn!(user_id = %user_id, "Scheduled dispatch failed: {e}"),
        }
    }
    report
}

/// Spawn the scheduler background task. Returns `None` when disabled.
pub fn spawn_dispatch_scheduler(
    dispatcher: Arc<Dispatcher>,
    db: Arc<dyn Database>,
    config: SchedulerConfig,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.enabled {
        info!("Dispatch scheduler disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        loop {
            let Some(next) = config.schedule.upcoming(Utc).next() else {
                warn!("Dispatch schedule has no upcoming fire time, scheduler stopping");
                return;
            };

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(next = %next, "Next scheduled dispatch");
            tokio::time::sleep(wait).await;

            let report = run_scheduled_pass(&dispatcher, db.as_ref()).await;
            if report.users > 0 {
                info!(
                    users = report.users,
                    sent = report.sent,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Scheduled dispatch pass complete"
                );
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SenderRegistry;
    use crate::config::{DispatchConfig, RateLimitConfig};
    use crate::dispatch::model::{Channel, OutreachTask, Recipient};
    use crate::dispatch::{RateLimiter, SystemClock};
    use crate::store::{LibSqlBackend, LogQuery};
    use std::str::FromStr;

    async fn setup() -> (Arc<Dispatcher>, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let limiter = Arc::new(RateLimiter::new(
            db.clone(),
            RateLimitConfig::default(),
            Arc::new(SystemClock),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            Arc::new(SenderRegistry::new()),
            limiter,
            DispatchConfig::default(),
        ));
        (dispatcher, db)
    }

    #[tokio::test]
    async fn pass_visits_every_eligible_user() {
        let (dispatcher, db) = setup().await;
        for user in ["u1", "u2"] {
            let task =
                OutreachTask::new(user, "camp", "cand", Channel::Sms, "hi", Recipient::new("Ada"))
                    .approved();
            db.insert_task(&task).await.unwrap();
        }
        // Unapproved tasks do not make a user eligible.
        let pending = OutreachTask::new("u3", "camp", "cand", Channel::Sms, "hi", Recipient::new("Bo"));
        db.insert_task(&pending).await.unwrap();

        let report = run_scheduled_pass(&dispatcher, db.as_ref()).await;
        assert_eq!(report.users, 2);
        assert_eq!(report.skipped, 2);

        for user in ["u1", "u2"] {
            let entries = db
                .list_log_entries(&LogQuery {
                    user_id: Some(user.into()),
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(entries.len(), 1);
        }
    }

    #[tokio::test]
    async fn pass_with_no_users_is_empty() {
        let (dispatcher, db) = setup().await;
        assert_eq!(
            run_scheduled_pass(&dispatcher, db.as_ref()).await,
            PassReport::default()
        );
    }

    #[tokio::test]
    async fn disabled_scheduler_does_not_spawn() {
        let (dispatcher, db) = setup().await;
        let config = SchedulerConfig {
            enabled: false,
            schedule: cron::Schedule::from_str("0 * * * * *").unwrap(),
        };
        assert!(spawn_dispatch_scheduler(dispatcher, db, config).is_none());
    }
}
