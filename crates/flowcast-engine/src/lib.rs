//! # Flowcast Engine
//!
//! Workflow registry, account pipeline and the dual execution engine, plus
//! the `Orchestrator` facade that wires them to the scheduler and queue.
//!
//! ```text
//! trigger (api / cron / recurring / event)
//!   └── Orchestrator ──▶ PersistentQueue ──▶ WorkflowJobProcessor
//!                              │                      │
//!                              └──────────────▶ DualExecutionEngine
//!                                                 ├── delegated (HTTP engine, polled)
//!                                                 └── internal: AccountPipeline per account
//!                                                       └── plan → customize → fan-out
//! ```

pub mod delegate;
pub mod engine;
pub mod jobs;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod service;

pub use delegate::{DelegateRun, HttpDelegateEngine, RunState};
pub use engine::DualExecutionEngine;
pub use jobs::WorkflowJobProcessor;
pub use pipeline::{AccountPipeline, apply_customization};
pub use planner::{HttpPlanGenerator, TemplatePlanGenerator};
pub use registry::WorkflowRegistry;
pub use service::{HealthReport, Orchestrator, OrchestratorBuilder};
