//! Execution log writer.
//!
//! Appends one audit row per processed task. Writes are best-effort: a
//! failed append is reported through `tracing` and never reaches the caller.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::dispatch::model::{ExecutionLogEntry, TaskDetail};
use crate::store::Database;

pub struct ExecutionLog {
    db: Arc<dyn Database>,
}

impl ExecutionLog {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Append the audit row for `detail`. Returns whether the row was stored.
    pub async fn record(&self, run_id: Uuid, user_id: &str, detail: &TaskDetail) -> bool {
        let entry = ExecutionLogEntry::from_detail(run_id, user_id, detail);
        match self.db.append_log_entry(&entry).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    run_id = %run_id,
                    task_id = %detail.task_id,
                    status = %detail.status,
                    error = %e,
                    "Execution log write failed"
                );
                false
            }
        }
    }
}
