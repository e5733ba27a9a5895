//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are written
//! as fixed-width RFC 3339 (microsecond precision, `Z` suffix) so that
//! lexicographic order matches chronological order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::model::{
    ApprovalStatus, Channel, DispatchOutcome, ExecutionLogEntry, OutreachTask, Recipient,
    SendStatus, TaskFilter, TaskUpdate,
};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    ChannelConnection, ConnectionProvider, ConnectionStatus, Database, LogQuery,
};

/// Default and maximum page sizes for execution log reads.
const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run raw SQL against the store (fault injection in tests).
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(sql)
            .await
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(format!("execute_raw: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp encoding.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Day key for the send counter table.
fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Map a libsql Row to an OutreachTask.
///
/// Column order matches TASK_COLUMNS.
fn row_to_task(row: &libsql::Row) -> Result<OutreachTask, libsql::Error> {
    let id_str: String = row.get(0)?;
    let channel_str: String = row.get(4)?;
    let recipient_str: String = row.get(7)?;
    let approval_str: String = row.get(8)?;
    let send_str: String = row.get(9)?;
    let skip_str: Option<String> = row.get(10).ok();
    let attempts: i64 = row.get(11).unwrap_or(0);
    let sent_at_str: Option<String> = row.get(14).ok();
    let created_str: String = row.get(15)?;
    let updated_str: String = row.get(16)?;

    let recipient: Recipient = serde_json::from_str(&recipient_str).unwrap_or_else(|e| {
        warn!(task_id = %id_str, "Unreadable recipient JSON: {e}");
        Recipient::default()
    });

    Ok(OutreachTask {
        id: parse_uuid(&id_str),
        user_id: row.get(1)?,
        campaign_id: row.get(2)?,
        candidate_id: row.get(3)?,
        channel: channel_str.parse().unwrap_or(Channel::Email),
        content: row.get(5)?,
        subject: row.get(6).ok(),
        recipient,
        approval_status: approval_str.parse().unwrap_or(ApprovalStatus::Pending),
        send_status: send_str.parse().unwrap_or(SendStatus::Pending),
        skip_reason: skip_str.and_then(|s| s.parse().ok()),
        attempts: u32::try_from(attempts).unwrap_or(0),
        last_error: row.get(12).ok(),
        provider_message_id: row.get(13).ok(),
        sent_at: parse_optional_datetime(&sent_at_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a ChannelConnection.
fn row_to_connection(row: &libsql::Row) -> Result<ChannelConnection, libsql::Error> {
    let channel_str: String = row.get(1)?;
    let provider_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    let last_used_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(ChannelConnection {
        user_id: row.get(0)?,
        channel: channel_str.parse().unwrap_or(Channel::Email),
        provider: provider_str.parse().unwrap_or(ConnectionProvider::Composio),
        account_ref: row.get(3)?,
        status: status_str.parse().unwrap_or(ConnectionStatus::Inactive),
        last_used_at: parse_optional_datetime(&last_used_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to an ExecutionLogEntry.
fn row_to_log_entry(row: &libsql::Row) -> Result<ExecutionLogEntry, libsql::Error> {
    let id_str: String = row.get(0)?;
    let run_str: String = row.get(1)?;
    let task_str: String = row.get(2)?;
    let channel_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(9)?;

    Ok(ExecutionLogEntry {
        id: parse_uuid(&id_str),
        run_id: parse_uuid(&run_str),
        task_id: parse_uuid(&task_str),
        user_id: row.get(3)?,
        candidate_name: row.get(4)?,
        channel: channel_str.parse().unwrap_or(Channel::Email),
        status: status_str.parse().unwrap_or(DispatchOutcome::Failed),
        error: row.get(7).ok(),
        provider_message_id: row.get(8).ok(),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const TASK_COLUMNS: &str = "id, user_id, campaign_id, candidate_id, channel, content, subject, recipient, approval_status, send_status, skip_reason, attempts, last_error, provider_message_id, sent_at, created_at, updated_at";

const CONNECTION_COLUMNS: &str =
    "user_id, channel, provider, account_ref, status, last_used_at, created_at, updated_at";

const LOG_COLUMNS: &str = "id, run_id, task_id, user_id, candidate_name, channel, status, error, provider_message_id, created_at";

/// Send statuses a task may be fetched in.
const ELIGIBLE_CONDITION: &str =
    "approval_status = 'approved' AND send_status IN ('pending', 'skipped')";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn insert_task(&self, task: &OutreachTask) -> Result<(), DatabaseError> {
        let recipient_json = serde_json::to_string(&task.recipient)
            .map_err(|e| DatabaseError::Serialization(format!("task recipient: {e}")))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO outreach_tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    task.id.to_string(),
                    task.user_id.as_str(),
                    task.campaign_id.as_str(),
                    task.candidate_id.as_str(),
                    task.channel.as_str(),
                    task.content.as_str(),
                    opt_text(task.subject.as_deref()),
                    recipient_json,
                    task.approval_status.as_str(),
                    task.send_status.as_str(),
                    opt_text(task.skip_reason.map(|r| r.as_str())),
                    task.attempts as i64,
                    opt_text(task.last_error.as_deref()),
                    opt_text(task.provider_message_id.as_deref()),
                    opt_text(task.sent_at.as_ref().map(ts).as_deref()),
                    ts(&task.created_at),
                    ts(&task.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;

        debug!(task_id = %task.id, channel = %task.channel, "Task inserted into DB");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<OutreachTask>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM outreach_tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let task = row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_task row parse: {e}")))?;
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task: {e}"))),
        }
    }

    async fn fetch_approved_unsent(
        &self,
        filter: &TaskFilter,
    ) -> Result<Vec<OutreachTask>, DatabaseError> {
        let mut sql = format!(
            "SELECT {TASK_COLUMNS} FROM outreach_tasks WHERE {ELIGIBLE_CONDITION} AND user_id = ?1"
        );
        let mut values: Vec<libsql::Value> = vec![libsql::Value::Text(filter.user_id.clone())];

        if let Some(ref campaign_id) = filter.campaign_id {
            values.push(libsql::Value::Text(campaign_id.clone()));
            sql.push_str(&format!(" AND campaign_id = ?{}", values.len()));
        }

        if !filter.channels.is_empty() {
            let mut placeholders = Vec::with_capacity(filter.channels.len());
            for channel in &filter.channels {
                values.push(libsql::Value::Text(channel.as_str().to_string()));
                placeholders.push(format!("?{}", values.len()));
            }
            sql.push_str(&format!(" AND channel IN ({})", placeholders.join(", ")));
        }

        values.push(libsql::Value::Integer(filter.limit as i64));
        sql.push_str(&format!(
            " ORDER BY created_at ASC, id ASC LIMIT ?{}",
            values.len()
        ));

        let mut rows = self
            .conn()
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("fetch_approved_unsent: {e}")))?;

        let mut tasks = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_task(&row) {
                    Ok(task) => tasks.push(task),
                    Err(e) => warn!("Skipping task row: {e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    return Err(DatabaseError::Query(format!("fetch_approved_unsent: {e}")));
                }
            }
        }
        Ok(tasks)
    }

    async fn claim_task(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE outreach_tasks SET send_status = 'sending', updated_at = ?1
                     WHERE id = ?2 AND {ELIGIBLE_CONDITION}"
                ),
                params![ts(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_task: {e}")))?;
        Ok(changed > 0)
    }

    async fn fail_interrupted_sends(&self) -> Result<usize, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE outreach_tasks
                 SET send_status = 'failed', skip_reason = NULL,
                     last_error = 'dispatch interrupted, delivery unknown',
                     attempts = attempts + 1, updated_at = ?1
                 WHERE send_status = 'sending'",
                params![ts(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("fail_interrupted_sends: {e}")))?;
        Ok(changed as usize)
    }

    async fn mark_task_status(
        &self,
        id: Uuid,
        update: &TaskUpdate,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let (skip_reason, last_error, provider_id, sent_at) = match update {
            TaskUpdate::Sent {
                provider_message_id,
            } => (None, None, provider_message_id.as_deref(), Some(ts(&now))),
            TaskUpdate::Failed { error } => (None, Some(error.as_str()), None, None),
            TaskUpdate::Skipped { reason } => (Some(reason.as_str()), None, None, None),
        };

        let changed = self
            .conn()
            .execute(
                "UPDATE outreach_tasks
                 SET send_status = ?1, skip_reason = ?2, last_error = ?3,
                     provider_message_id = COALESCE(?4, provider_message_id),
                     sent_at = COALESCE(?5, sent_at),
                     attempts = attempts + 1, updated_at = ?6
                 WHERE id = ?7 AND send_status NOT IN ('sent', 'failed')",
                params![
                    update.send_status().as_str(),
                    opt_text(skip_reason),
                    opt_text(last_error),
                    opt_text(provider_id),
                    opt_text(sent_at.as_deref()),
                    ts(&now),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_task_status: {e}")))?;

        debug!(task_id = %id, status = update.send_status().as_str(), changed, "Task status updated in DB");
        Ok(changed > 0)
    }

    async fn list_users_with_eligible_tasks(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT DISTINCT user_id FROM outreach_tasks WHERE {ELIGIBLE_CONDITION} ORDER BY user_id"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_users_with_eligible_tasks: {e}")))?;

        let mut users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(user_id) = row.get::<String>(0) {
                users.push(user_id);
            }
        }
        Ok(users)
    }

    // ── Connections ─────────────────────────────────────────────────

    async fn upsert_connection(&self, connection: &ChannelConnection) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO channel_connections ({CONNECTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(user_id, channel) DO UPDATE SET
                         provider = excluded.provider,
                         account_ref = excluded.account_ref,
                         status = excluded.status,
                         updated_at = excluded.updated_at"
                ),
                params![
                    connection.user_id.as_str(),
                    connection.channel.as_str(),
                    connection.provider.as_str(),
                    connection.account_ref.as_str(),
                    connection.status.as_str(),
                    opt_text(connection.last_used_at.as_ref().map(ts).as_deref()),
                    ts(&connection.created_at),
                    ts(&connection.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_connection: {e}")))?;

        debug!(
            user_id = %connection.user_id,
            channel = %connection.channel,
            status = connection.status.as_str(),
            "Connection upserted"
        );
        Ok(())
    }

    async fn get_active_connection(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<Option<ChannelConnection>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONNECTION_COLUMNS} FROM channel_connections WHERE user_id = ?1 AND channel = ?2 AND status = 'active'"
                ),
                params![user_id, channel.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_active_connection: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let connection = row_to_connection(&row).map_err(|e| {
                    DatabaseError::Query(format!("get_active_connection row parse: {e}"))
                })?;
                Ok(Some(connection))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_active_connection: {e}"))),
        }
    }

    async fn set_connection_status(
        &self,
        user_id: &str,
        channel: Channel,
        status: ConnectionStatus,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE channel_connections SET status = ?1, updated_at = ?2 WHERE user_id = ?3 AND channel = ?4",
                params![status.as_str(), ts(&Utc::now()), user_id, channel.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_connection_status: {e}")))?;
        Ok(changed > 0)
    }

    async fn touch_connection(&self, user_id: &str, channel: Channel) -> Result<(), DatabaseError> {
        let now = ts(&Utc::now());
        self.conn()
            .execute(
                "UPDATE channel_connections SET last_used_at = ?1, updated_at = ?1 WHERE user_id = ?2 AND channel = ?3",
                params![now, user_id, channel.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_connection: {e}")))?;
        Ok(())
    }

    // ── Send counters ───────────────────────────────────────────────

    async fn reserve_send_slot(
        &self,
        user_id: &str,
        channel: Channel,
        day: NaiveDate,
        cap: u32,
    ) -> Result<bool, DatabaseError> {
        if cap == 0 {
            return Ok(false);
        }

        // Insert-or-increment in one statement; the WHERE guard makes the
        // conflict branch a no-op once the cap is reached.
        let changed = self
            .conn()
            .execute(
                "INSERT INTO send_counters (user_id, channel, day, count, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?5)
                 ON CONFLICT(user_id, channel, day) DO UPDATE SET
                     count = send_counters.count + 1,
                     updated_at = excluded.updated_at
                 WHERE send_counters.count < ?4",
                params![
                    user_id,
                    channel.as_str(),
                    day_key(day),
                    cap as i64,
                    ts(&Utc::now()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reserve_send_slot: {e}")))?;

        Ok(changed > 0)
    }

    async fn release_send_slot(
        &self,
        user_id: &str,
        channel: Channel,
        day: NaiveDate,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE send_counters SET count = count - 1, updated_at = ?1
                 WHERE user_id = ?2 AND channel = ?3 AND day = ?4 AND count > 0",
                params![ts(&Utc::now()), user_id, channel.as_str(), day_key(day)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_send_slot: {e}")))?;
        Ok(())
    }

    async fn get_send_count(
        &self,
        user_id: &str,
        channel: Channel,
        day: NaiveDate,
    ) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT count FROM send_counters WHERE user_id = ?1 AND channel = ?2 AND day = ?3",
                params![user_id, channel.as_str(), day_key(day)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_send_count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(u32::try_from(count).unwrap_or(0))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("get_send_count: {e}"))),
        }
    }

    // ── Execution log ───────────────────────────────────────────────

    async fn append_log_entry(&self, entry: &ExecutionLogEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO execution_log ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    entry.id.to_string(),
                    entry.run_id.to_string(),
                    entry.task_id.to_string(),
                    entry.user_id.as_str(),
                    entry.candidate_name.as_str(),
                    entry.channel.as_str(),
                    entry.status.as_str(),
                    opt_text(entry.error.as_deref()),
                    opt_text(entry.provider_message_id.as_deref()),
                    ts(&entry.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_log_entry: {e}")))?;
        Ok(())
    }

    async fn list_log_entries(
        &self,
        query: &LogQuery,
    ) -> Result<Vec<ExecutionLogEntry>, DatabaseError> {
        let mut conditions = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        if let Some(ref user_id) = query.user_id {
            values.push(libsql::Value::Text(user_id.clone()));
            conditions.push(format!("user_id = ?{}", values.len()));
        }
        if let Some(task_id) = query.task_id {
            values.push(libsql::Value::Text(task_id.to_string()));
            conditions.push(format!("task_id = ?{}", values.len()));
        }
        if let Some(run_id) = query.run_id {
            values.push(libsql::Value::Text(run_id.to_string()));
            conditions.push(format!("run_id = ?{}", values.len()));
        }

        let limit = query
            .limit
            .unwrap_or(DEFAULT_LOG_LIMIT)
            .clamp(1, MAX_LOG_LIMIT);
        values.push(libsql::Value::Integer(limit as i64));

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM execution_log{where_clause} ORDER BY created_at DESC, rowid DESC LIMIT ?{}",
            values.len()
        );

        let mut rows = self
            .conn()
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("list_log_entries: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_log_entry(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping log row: {e}"),
            }
        }
        Ok(entries)
    }
}
