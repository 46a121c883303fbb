//! SQLite-backed task store.
//!
//! 1 つの DB ファイルに `tasks` と `task_reminders` の 2 テーブル。
//!
//! # 接続のライフサイクル
//! - `SqliteTaskStore::new()` はパスを覚えるだけで接続しない
//! - 最初の操作で `OnceCell` が 1 回だけ接続・スキーマ適用を行う
//!   （同時に複数の呼び出しが来ても接続試行は 1 回）
//! - 以降は同じ接続を scheduler と CRUD 側で使い回す
//! - rusqlite の呼び出しはすべて `spawn_blocking` 上で行う
//!   （busy_timeout 待ちで runtime の worker を塞がない）
//!
//! # 壊れた行
//! 一覧系（`find_candidates`）はデコードできない行を warn して読み飛ばす。
//! 1 行のせいで他のタスクのリマインダーが止まらないように。
//! `find_by_id` は `StoreError::Corrupt` を返す。
//!
//! # claim のアトミック性
//! `task_reminders` の主キー `(task_id, threshold)` に対する
//! `INSERT OR IGNORE` 1 文で「未記録なら追加」を行う。
//! 別プロセスの scheduler が同じ DB を見ていても勝者は 1 つ。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::domain::{NewTask, RemindersSent, Task, TaskId, TaskStatus, Threshold};
use crate::ports::{
    ClaimOutcome, Clock, DeleteOutcome, IdGenerator, StoreError, SystemClock, TaskFilter,
    TaskStore, UlidGenerator,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    subject     TEXT,
    type        TEXT,
    meet_link   TEXT,
    date        TEXT,
    time        TEXT,
    period      TEXT,
    status      TEXT,
    owner_email TEXT NOT NULL DEFAULT 'shared',
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS task_reminders (
    task_id   TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    threshold INTEGER NOT NULL CHECK (threshold IN (60, 30, 10)),
    PRIMARY KEY (task_id, threshold)
);
CREATE INDEX IF NOT EXISTS tasks_status_idx ON tasks (status);
";

const SELECT_TASK: &str = "
SELECT t.id, t.title, t.subject, t.type, t.meet_link, t.date, t.time, t.period,
       t.status, t.owner_email, t.created_at,
       (SELECT group_concat(r.threshold) FROM task_reminders r WHERE r.task_id = t.id) AS sent
FROM tasks t";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed `TaskStore`.
pub struct SqliteTaskStore {
    path: PathBuf,
    conn: OnceCell<Arc<Mutex<Connection>>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl SqliteTaskStore {
    /// Remember `path`; the database is opened on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            conn: OnceCell::new(),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the one-time connection has happened.
    pub fn is_connected(&self) -> bool {
        self.conn.initialized()
    }

    async fn connection(&self) -> Result<Arc<Mutex<Connection>>, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let path = self.path.clone();
                let conn = tokio::task::spawn_blocking(move || open(&path))
                    .await
                    .map_err(join_err)??;
                Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
            })
            .await?;
        Ok(Arc::clone(conn))
    }

    /// Run `f` on the blocking pool with the connection locked.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.connection().await?;
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {e}")))?;
            f(&guard)
        })
        .await
        .map_err(join_err)?
    }
}

fn join_err(e: tokio::task::JoinError) -> StoreError {
    StoreError::Unavailable(format!("store worker failed: {e}"))
}

fn open(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
    }
    let conn = Connection::open(path).map_err(sql_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(sql_err)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(sql_err)?;
    conn.execute_batch(SCHEMA).map_err(sql_err)?;
    info!(path = %path.display(), "task store connected");
    Ok(conn)
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Raw column values of one row, decoded into a `Task` afterwards so that
/// decoding errors surface as `StoreError::Corrupt`.
struct TaskRow {
    id: String,
    title: String,
    subject: Option<String>,
    kind: Option<String>,
    meet_link: Option<String>,
    date: Option<String>,
    time: Option<String>,
    period: Option<String>,
    status: Option<String>,
    owner_email: String,
    created_at: String,
    sent: Option<String>,
}

impl TaskRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            subject: row.get("subject")?,
            kind: row.get("type")?,
            meet_link: row.get("meet_link")?,
            date: row.get("date")?,
            time: row.get("time")?,
            period: row.get("period")?,
            status: row.get("status")?,
            owner_email: row.get("owner_email")?,
            created_at: row.get("created_at")?,
            sent: row.get("sent")?,
        })
    }

    fn into_task(self) -> Result<Task, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };

        let id: TaskId = self.id.parse().map_err(|e| corrupt(format!("{e}")))?;
        let status =
            TaskStatus::from_stored(self.status.as_deref()).map_err(|e| corrupt(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {e}")))?
            .with_timezone(&Utc);

        let mut reminders_sent = RemindersSent::new();
        for raw in self.sent.as_deref().unwrap_or("").split(',').filter(|s| !s.is_empty()) {
            let minutes: u32 = raw
                .trim()
                .parse()
                .map_err(|_| corrupt(format!("reminder threshold {raw:?}")))?;
            let threshold = Threshold::try_from(minutes).map_err(|e| corrupt(e.to_string()))?;
            reminders_sent.insert(threshold);
        }

        Ok(Task {
            id,
            title: self.title,
            subject: self.subject,
            kind: self.kind,
            meet_link: self.meet_link,
            date: self.date,
            time: self.time,
            period: self.period,
            status,
            reminders_sent,
            owner_email: self.owner_email,
            created_at,
        })
    }
}

fn fetch_one(conn: &Connection, id: TaskId) -> Result<Option<Task>, StoreError> {
    let sql = format!("{SELECT_TASK} WHERE t.id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], TaskRow::read)
        .optional()
        .map_err(sql_err)?;
    row.map(TaskRow::into_task).transpose()
}

fn fetch_filtered(conn: &Connection, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    if let Some(statuses) = &filter.statuses {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        // legacy rows store NULL, which means pending
        let marks = vec!["?"; statuses.len()].join(", ");
        clauses.push(format!("COALESCE(t.status, 'pending') IN ({marks})"));
        args.extend(statuses.iter().map(|s| s.as_str().to_string()));
    }
    if let Some(owner) = &filter.owner_email {
        clauses.push("t.owner_email = ?".to_string());
        args.push(owner.clone());
    }
    if filter.scheduled_only {
        clauses.push("t.date IS NOT NULL AND t.time IS NOT NULL".to_string());
    }

    let mut sql = SELECT_TASK.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY t.created_at DESC, t.id DESC");

    let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), TaskRow::read)
        .map_err(sql_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err)?;
    Ok(rows.into_iter().filter_map(decode_or_skip).collect())
}

fn decode_or_skip(row: TaskRow) -> Option<Task> {
    let task_id = row.id.clone();
    match row.into_task() {
        Ok(task) => Some(task),
        Err(err) => {
            warn!(task_id = %task_id, error = %err, "undecodable task row skipped");
            None
        }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn find_candidates(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let filter = filter.clone();
        self.with_conn(move |conn| fetch_filtered(conn, &filter)).await
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| fetch_one(conn, id)).await
    }

    async fn create(&self, new: NewTask) -> Result<Task, StoreError> {
        new.validate()?;
        let task = Task::from_new(self.ids.generate_task_id(), new, self.clock.now());

        let task = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, title, subject, type, meet_link, date, time, period,
                                        status, owner_email, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        task.id.to_string(),
                        task.title,
                        task.subject,
                        task.kind,
                        task.meet_link,
                        task.date,
                        task.time,
                        task.period,
                        task.status.as_str(),
                        task.owner_email,
                        task.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                    ],
                )
                .map_err(sql_err)?;
                Ok(task)
            })
            .await?;

        debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    async fn claim_threshold(
        &self,
        id: TaskId,
        threshold: Threshold,
    ) -> Result<ClaimOutcome, StoreError> {
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO task_reminders (task_id, threshold)
                     SELECT id, ?2 FROM tasks WHERE id = ?1",
                    params![id.to_string(), threshold.minutes()],
                )
                .map_err(sql_err)?;
            if inserted == 0 {
                return Ok(ClaimOutcome::Rejected);
            }
            let task = fetch_one(conn, id)?.ok_or(StoreError::NotFound(id))?;
            Ok(ClaimOutcome::Claimed(task))
        })
        .await
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, StoreError> {
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE tasks SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id.to_string()],
                )
                .map_err(sql_err)?;
            if updated == 0 {
                return Err(StoreError::NotFound(id));
            }
            fetch_one(conn, id)?.ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn delete_by_id(&self, id: TaskId) -> Result<DeleteOutcome, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(sql_err)?;
            tx.execute(
                "DELETE FROM task_reminders WHERE task_id = ?1",
                params![id.to_string()],
            )
            .map_err(sql_err)?;
            let deleted = tx
                .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
                .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(if deleted == 0 {
                DeleteOutcome::NotFound
            } else {
                DeleteOutcome::Deleted
            })
        })
        .await
    }
}
