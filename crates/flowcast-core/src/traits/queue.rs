//! Durable queue backend trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::types::{JobStatus, QueueCounts, QueueJob, RecurringRegistration};

/// Storage behind the persistent queue.
///
/// Connection-oriented: the queue calls `connect` and `health_check` at
/// startup and runs disabled if either fails.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn health_check(&self) -> Result<bool>;

    /// Move jobs left `active` by a previous process back to `waiting`.
    async fn reset_active(&self) -> Result<usize>;

    async fn insert(&self, job: &QueueJob) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<QueueJob>>;

    /// Atomically claim up to `limit` waiting jobs with `run_at <= now`,
    /// marking them active and counting the attempt.
    async fn claim_ready(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueJob>>;

    async fn complete(&self, id: &str, result: &Value, finished_at: DateTime<Utc>) -> Result<()>;

    /// Put an active job back to waiting until `run_at`.
    async fn retry_later(&self, id: &str, error: &str, run_at: DateTime<Utc>) -> Result<()>;

    async fn fail(&self, id: &str, error: &str, finished_at: DateTime<Utc>) -> Result<()>;

    /// Most recent first.
    async fn list(&self, queue: &str, status: JobStatus, limit: usize) -> Result<Vec<QueueJob>>;

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueCounts>;

    /// Keep only the `keep` most recently finished jobs with `status`.
    async fn prune(&self, queue: &str, status: JobStatus, keep: usize) -> Result<usize>;

    /// Earliest `run_at` among waiting jobs, ignoring recurring occurrences
    /// that have not been attempted yet.
    async fn next_pending_at(&self, queue: &str) -> Result<Option<DateTime<Utc>>>;

    /// Delete waiting occurrences carrying this job name.
    async fn remove_pending_by_name(&self, name: &str) -> Result<usize>;

    /// Whether a waiting occurrence carrying this job name exists.
    async fn has_pending_by_name(&self, name: &str) -> Result<bool>;

    async fn put_recurring(&self, registration: &RecurringRegistration) -> Result<()>;

    async fn get_recurring(&self, job_name: &str) -> Result<Option<RecurringRegistration>>;

    async fn delete_recurring(&self, job_name: &str) -> Result<bool>;

    async fn list_recurring(&self) -> Result<Vec<RecurringRegistration>>;
}
