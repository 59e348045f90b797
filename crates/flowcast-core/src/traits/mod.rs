//! Interfaces to the collaborators the engine consumes.

pub mod channel;
pub mod delegate;
pub mod planner;
pub mod queue;
pub mod schedule;

pub use channel::ChannelHandler;
pub use delegate::{DelegateEngine, DelegateRunState, DelegateStatus, RunHandle};
pub use planner::PlanGenerator;
pub use queue::QueueBackend;
pub use schedule::ScheduleStore;
