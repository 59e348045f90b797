//! SQLite queue backend. Durable across restarts, no external broker.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::QueueBackend;
use flowcast_core::types::{JobStatus, JobType, QueueCounts, QueueJob, RecurringRegistration};

const JOB_COLUMNS: &str = "id, queue, job_type, name, payload, status, attempts_made, max_attempts, \
                           run_at, created_at, finished_at, last_error, result";

fn db_err(e: impl std::fmt::Display) -> FlowcastError {
    FlowcastError::Database(e.to_string())
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// SQLite-backed job store. `connect` opens the file (or an in-memory DB).
pub struct SqliteQueueBackend {
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl SqliteQueueBackend {
    pub fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            conn: Mutex::new(None),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard: MutexGuard<'_, Option<Connection>> =
            self.conn.lock().map_err(|e| db_err(format!("Lock: {e}")))?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| FlowcastError::QueueUnavailable("queue store not connected".into()))?;
        f(conn)
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS queue_jobs (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                job_type TEXT NOT NULL,          -- 'execute-workflow', 'scheduled-workflow', 'recurring-workflow'
                name TEXT,                       -- recurring registration name
                payload TEXT NOT NULL,           -- JSON
                status TEXT NOT NULL DEFAULT 'waiting',
                attempts_made INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 1,
                run_at INTEGER NOT NULL,         -- unix millis
                created_at INTEGER NOT NULL,
                finished_at INTEGER,
                last_error TEXT,
                result TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_queue_jobs_ready ON queue_jobs (queue, status, run_at);
            CREATE INDEX IF NOT EXISTS idx_queue_jobs_name ON queue_jobs (name);

            CREATE TABLE IF NOT EXISTS queue_recurring (
                job_name TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                cron TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                next_run_at INTEGER
            );
            ",
        )
        .map_err(|e| db_err(format!("Migration: {e}")))
    }
}

type JobRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    u32,
    u32,
    i64,
    i64,
    Option<i64>,
    Option<String>,
    Option<String>,
);

fn read_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

fn decode_job(r: JobRow) -> Result<QueueJob> {
    let job_type = JobType::parse(&r.2).ok_or_else(|| db_err(format!("unknown job type '{}'", r.2)))?;
    let status = JobStatus::parse(&r.5).ok_or_else(|| db_err(format!("unknown job status '{}'", r.5)))?;
    Ok(QueueJob {
        id: r.0,
        queue: r.1,
        job_type,
        name: r.3,
        payload: serde_json::from_str(&r.4)?,
        status,
        attempts_made: r.6,
        max_attempts: r.7,
        run_at: from_millis(r.8),
        created_at: from_millis(r.9),
        finished_at: r.10.map(from_millis),
        last_error: r.11,
        result: r.12.map(|s| serde_json::from_str(&s)).transpose()?,
    })
}

fn query_jobs(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<QueueJob>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params, read_job_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    rows.into_iter().map(decode_job).collect()
}

type RecurringRow = (String, String, String, String, i64, Option<i64>);

fn read_recurring_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecurringRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn decode_recurring(r: RecurringRow) -> Result<RecurringRegistration> {
    Ok(RecurringRegistration {
        job_name: r.0,
        queue: r.1,
        cron: r.2,
        payload: serde_json::from_str(&r.3)?,
        created_at: from_millis(r.4),
        next_run_at: r.5.map(from_millis),
    })
}

#[async_trait]
impl QueueBackend for SqliteQueueBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.conn.lock().map_err(|e| db_err(format!("Lock: {e}")))?;
        if guard.is_some() {
            return Ok(());
        }
        let conn = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(path).map_err(|e| db_err(format!("DB open: {e}")))?;
                conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
                conn
            }
            None => Connection::open_in_memory().map_err(db_err)?,
        };
        Self::migrate(&conn)?;
        *guard = Some(conn);
        let location = self
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".into());
        tracing::debug!("🗄️ Queue store connected ({location})");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0)).map_err(db_err)?;
            Ok(one == 1)
        })
    }

    async fn reset_active(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute("UPDATE queue_jobs SET status = 'waiting' WHERE status = 'active'", [])
                .map_err(db_err)
        })
    }

    async fn insert(&self, job: &QueueJob) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        let result = job.result.as_ref().map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO queue_jobs ({JOB_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    job.id,
                    job.queue,
                    job.job_type.as_str(),
                    job.name,
                    payload,
                    job.status.as_str(),
                    job.attempts_made,
                    job.max_attempts,
                    millis(job.run_at),
                    millis(job.created_at),
                    job.finished_at.map(millis),
                    job.last_error,
                    result,
                ],
            )
            .map_err(|e| db_err(format!("Insert job: {e}")))?;
            Ok(())
        })
    }

    async fn get(&self, id: &str) -> Result<Option<QueueJob>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = ?1"),
                    params![id],
                    read_job_row,
                )
                .optional()
                .map_err(db_err)?;
            row.map(decode_job).transpose()
        })
    }

    async fn claim_ready(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueJob>> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM queue_jobs
                     WHERE queue = ?1 AND status = 'waiting' AND run_at <= ?2
                     ORDER BY run_at, created_at LIMIT ?3",
                )
                .map_err(db_err)?;
            let ids: Vec<String> = stmt
                .query_map(params![queue, millis(now), limit as i64], |r| r.get(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            drop(stmt);

            let mut jobs = Vec::with_capacity(ids.len());
            for id in &ids {
                tx.execute(
                    "UPDATE queue_jobs SET status = 'active', attempts_made = attempts_made + 1
                     WHERE id = ?1",
                    params![id],
                )
                .map_err(db_err)?;
                let row = tx
                    .query_row(
                        &format!("SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = ?1"),
                        params![id],
                        read_job_row,
                    )
                    .map_err(db_err)?;
                jobs.push(decode_job(row)?);
            }
            tx.commit().map_err(db_err)?;
            Ok(jobs)
        })
    }

    async fn complete(&self, id: &str, result: &Value, finished_at: DateTime<Utc>) -> Result<()> {
        let result = serde_json::to_string(result)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE queue_jobs SET status = 'completed', result = ?2, finished_at = ?3 WHERE id = ?1",
                params![id, result, millis(finished_at)],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn retry_later(&self, id: &str, error: &str, run_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE queue_jobs SET status = 'waiting', last_error = ?2, run_at = ?3 WHERE id = ?1",
                params![id, error, millis(run_at)],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn fail(&self, id: &str, error: &str, finished_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE queue_jobs SET status = 'failed', last_error = ?2, finished_at = ?3 WHERE id = ?1",
                params![id, error, millis(finished_at)],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn list(&self, queue: &str, status: JobStatus, limit: usize) -> Result<Vec<QueueJob>> {
        self.with_conn(|conn| {
            query_jobs(
                conn,
                &format!(
                    "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE queue = ?1 AND status = ?2
                     ORDER BY COALESCE(finished_at, created_at) DESC, rowid DESC LIMIT ?3"
                ),
                params![queue, status.as_str(), limit as i64],
            )
        })
    }

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueCounts> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT status, run_at > ?2, COUNT(*) FROM queue_jobs
                     WHERE queue = ?1 GROUP BY status, run_at > ?2",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![queue, millis(now)], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, bool>(1)?, r.get::<_, i64>(2)?))
                })
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;

            let mut counts = QueueCounts::default();
            for (status, future, n) in rows {
                let n = n as usize;
                match (JobStatus::parse(&status), future) {
                    (Some(JobStatus::Waiting), true) => counts.delayed += n,
                    (Some(JobStatus::Waiting), false) => counts.waiting += n,
                    (Some(JobStatus::Active), _) => counts.active += n,
                    (Some(JobStatus::Completed), _) => counts.completed += n,
                    (Some(JobStatus::Failed), _) => counts.failed += n,
                    (None, _) => {}
                }
            }
            Ok(counts)
        })
    }

    async fn prune(&self, queue: &str, status: JobStatus, keep: usize) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM queue_jobs WHERE id IN (
                    SELECT id FROM queue_jobs WHERE queue = ?1 AND status = ?2
                    ORDER BY finished_at DESC, rowid DESC LIMIT -1 OFFSET ?3
                 )",
                params![queue, status.as_str(), keep as i64],
            )
            .map_err(db_err)
        })
    }

    async fn next_pending_at(&self, queue: &str) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let ms: Option<i64> = conn
                .query_row(
                    "SELECT MIN(run_at) FROM queue_jobs
                     WHERE queue = ?1 AND status = 'waiting'
                       AND (job_type != 'recurring-workflow' OR attempts_made > 0)",
                    params![queue],
                    |r| r.get(0),
                )
                .map_err(db_err)?;
            Ok(ms.map(from_millis))
        })
    }

    async fn remove_pending_by_name(&self, name: &str) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM queue_jobs WHERE name = ?1 AND status = 'waiting'",
                params![name],
            )
            .map_err(db_err)
        })
    }

    async fn has_pending_by_name(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM queue_jobs WHERE name = ?1 AND status = 'waiting'",
                    params![name],
                    |r| r.get(0),
                )
                .map_err(db_err)?;
            Ok(n > 0)
        })
    }

    async fn put_recurring(&self, registration: &RecurringRegistration) -> Result<()> {
        let payload = serde_json::to_string(&registration.payload)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO queue_recurring
                 (job_name, queue, cron, payload, created_at, next_run_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    registration.job_name,
                    registration.queue,
                    registration.cron,
                    payload,
                    millis(registration.created_at),
                    registration.next_run_at.map(millis),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn get_recurring(&self, job_name: &str) -> Result<Option<RecurringRegistration>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT job_name, queue, cron, payload, created_at, next_run_at
                     FROM queue_recurring WHERE job_name = ?1",
                    params![job_name],
                    read_recurring_row,
                )
                .optional()
                .map_err(db_err)?;
            row.map(decode_recurring).transpose()
        })
    }

    async fn delete_recurring(&self, job_name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn
                .execute("DELETE FROM queue_recurring WHERE job_name = ?1", params![job_name])
                .map_err(db_err)?;
            Ok(n > 0)
        })
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringRegistration>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT job_name, queue, cron, payload, created_at, next_run_at
                     FROM queue_recurring ORDER BY job_name",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], read_recurring_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows.into_iter().map(decode_recurring).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(id: &str, run_at: DateTime<Utc>) -> QueueJob {
        QueueJob {
            id: id.into(),
            queue: "q".into(),
            job_type: JobType::ExecuteWorkflow,
            name: None,
            payload: json!({"workflow_id": "wf"}),
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: 3,
            run_at,
            created_at: run_at,
            finished_at: None,
            last_error: None,
            result: None,
        }
    }

    #[tokio::test]
    async fn test_not_connected_is_unavailable() {
        let backend = SqliteQueueBackend::in_memory();
        let err = backend.insert(&job("a", Utc::now())).await.unwrap_err();
        assert!(matches!(err, FlowcastError::QueueUnavailable(_)));
    }

    #[tokio::test]
    async fn test_claim_respects_run_at_and_limit() {
        let backend = SqliteQueueBackend::in_memory();
        backend.connect().await.unwrap();
        let now = Utc::now();
        backend.insert(&job("a", now - chrono::Duration::seconds(2))).await.unwrap();
        backend.insert(&job("b", now - chrono::Duration::seconds(1))).await.unwrap();
        backend.insert(&job("later", now + chrono::Duration::minutes(5))).await.unwrap();

        let claimed = backend.claim_ready("q", now, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "a");
        assert_eq!(claimed[0].status, JobStatus::Active);
        assert_eq!(claimed[0].attempts_made, 1);

        let counts = backend.counts("q", now).await.unwrap();
        assert_eq!((counts.waiting, counts.delayed, counts.active), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_prune_keeps_most_recent() {
        let backend = SqliteQueueBackend::in_memory();
        backend.connect().await.unwrap();
        let now = Utc::now();
        for i in 0..5 {
            let id = format!("j{i}");
            backend.insert(&job(&id, now)).await.unwrap();
            backend
                .fail(&id, "boom", now + chrono::Duration::seconds(i))
                .await
                .unwrap();
        }
        assert_eq!(backend.prune("q", JobStatus::Failed, 2).await.unwrap(), 3);
        let failed = backend.list("q", JobStatus::Failed, 10).await.unwrap();
        let ids: Vec<_> = failed.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["j4", "j3"]);
    }

    #[tokio::test]
    async fn test_reset_active_after_crash() {
        let backend = SqliteQueueBackend::in_memory();
        backend.connect().await.unwrap();
        let now = Utc::now();
        backend.insert(&job("a", now)).await.unwrap();
        backend.claim_ready("q", now, 10).await.unwrap();
        assert_eq!(backend.reset_active().await.unwrap(), 1);
        assert_eq!(backend.get("a").await.unwrap().unwrap().status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn test_pending_by_name_ignores_claimed() {
        let backend = SqliteQueueBackend::in_memory();
        backend.connect().await.unwrap();
        let now = Utc::now();
        let mut running = job("a", now);
        running.name = Some("nightly".into());
        backend.insert(&running).await.unwrap();
        assert!(backend.has_pending_by_name("nightly").await.unwrap());

        backend.claim_ready("q", now, 10).await.unwrap();
        assert!(!backend.has_pending_by_name("nightly").await.unwrap());
        assert!(!backend.has_pending_by_name("other").await.unwrap());
    }
}
