//! # Flowcast Gateway
//!
//! Axum HTTP API over the orchestrator: workflow CRUD, execution, events,
//! queue inspection and schedule management.

pub mod error;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, build_router, start};
