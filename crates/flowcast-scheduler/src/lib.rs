//! # Flowcast Scheduler
//!
//! Timer-driven cron scheduling and a durable multi-queue job runner.
//!
//! ## Design
//! - No external broker: SQLite persistence, survives restarts
//! - Tokio timers only, idle workers sleep until woken
//! - Retry with fixed or exponential backoff, bounded retention
//!
//! ## Architecture
//! ```text
//! WorkflowScheduler (one tokio task per workflow)
//!   └── cron fires → TriggerSink (engine side)
//!
//! PersistentQueue
//!   ├── on-demand-execution   ─┐
//!   ├── scheduled-execution   ─┼── worker loop per queue (semaphore = concurrency)
//!   └── recurring-execution   ─┘        └── JobProcessor → retry / fail / re-arm
//! ```

pub mod cron;
pub mod persistence;
pub mod queue;
pub mod scheduler;

pub use cron::CronSchedule;
pub use persistence::{MemoryScheduleStore, SqliteScheduleStore};
pub use queue::{JobHandle, JobOptions, JobOutcome, JobProcessor, PersistentQueue, QueueEvent};
pub use queue::sqlite::SqliteQueueBackend;
pub use scheduler::{TriggerSink, WorkflowScheduler};
