//! Schedule metadata stores.
//!
//! Records are keyed by workflow name and carry a snapshot of the workflow,
//! so schedules can be inspected, cancelled, or re-armed independently of
//! the in-memory registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::ScheduleStore;
use flowcast_core::types::ScheduleMetadata;

fn db_err(e: impl std::fmt::Display) -> FlowcastError {
    FlowcastError::Database(e.to_string())
}

/// SQLite-backed schedule metadata store.
pub struct SqliteScheduleStore {
    conn: Mutex<Connection>,
}

impl SqliteScheduleStore {
    /// Open or create the store.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| db_err(format!("DB open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// In-memory store (tests, ephemeral runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schedule_metadata (
                name TEXT PRIMARY KEY,
                job_name TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                workflow TEXT NOT NULL,      -- JSON snapshot
                context TEXT NOT NULL DEFAULT 'null',
                created_at TEXT NOT NULL
            );",
        )
        .map_err(|e| db_err(format!("Migration: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| db_err(format!("Lock: {e}")))
    }
}

fn row_to_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode(
    (job_name, cron_expression, workflow, context, created_at): (String, String, String, String, String),
) -> Result<ScheduleMetadata> {
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(db_err)?;
    Ok(ScheduleMetadata {
        cron_expression,
        workflow: serde_json::from_str(&workflow)?,
        context: serde_json::from_str(&context)?,
        created_at,
        job_name,
    })
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn put(&self, name: &str, metadata: &ScheduleMetadata) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO schedule_metadata
             (name, job_name, cron_expression, workflow, context, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                metadata.job_name,
                metadata.cron_expression,
                serde_json::to_string(&metadata.workflow)?,
                serde_json::to_string(&metadata.context)?,
                metadata.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| db_err(format!("Save schedule: {e}")))?;
        tracing::debug!("💾 Saved schedule metadata '{name}'");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<ScheduleMetadata>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT job_name, cron_expression, workflow, context, created_at
                 FROM schedule_metadata WHERE name = ?1",
                params![name],
                row_to_metadata,
            )
            .optional()
            .map_err(db_err)?;
        row.map(decode).transpose()
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute("DELETE FROM schedule_metadata WHERE name = ?1", params![name])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    async fn list_all(&self) -> Result<Vec<ScheduleMetadata>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT job_name, cron_expression, workflow, context, created_at
                 FROM schedule_metadata ORDER BY name",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], row_to_metadata)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(decode).collect()
    }
}

/// Volatile store for tests and single-run tooling.
#[derive(Default)]
pub struct MemoryScheduleStore {
    records: Mutex<BTreeMap<String, ScheduleMetadata>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn put(&self, name: &str, metadata: &ScheduleMetadata) -> Result<()> {
        let mut records = self.records.lock().map_err(|e| db_err(format!("Lock: {e}")))?;
        records.insert(name.to_string(), metadata.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<ScheduleMetadata>> {
        let records = self.records.lock().map_err(|e| db_err(format!("Lock: {e}")))?;
        Ok(records.get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut records = self.records.lock().map_err(|e| db_err(format!("Lock: {e}")))?;
        Ok(records.remove(name).is_some())
    }

    async fn list_all(&self) -> Result<Vec<ScheduleMetadata>> {
        let records = self.records.lock().map_err(|e| db_err(format!("Lock: {e}")))?;
        Ok(records.values().cloned().collect())
    }
}
