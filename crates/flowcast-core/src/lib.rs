//! # Flowcast Core
//!
//! Shared foundation for every Flowcast crate:
//! - `error`: the error taxonomy and its HTTP status mapping
//! - `config`: TOML configuration (`~/.flowcast/config.toml`)
//! - `types`: workflows, executions, plans, queue jobs
//! - `graph`: typed node graph submitted to a delegated engine
//! - `traits`: narrow interfaces to external collaborators
//! - `clock`: injectable time source

pub mod clock;
pub mod config;
pub mod error;
pub mod graph;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FlowcastConfig;
pub use error::{FlowcastError, Result};
