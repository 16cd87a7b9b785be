//! Approval queue: the server snapshot ([`store`]) and the orchestration
//! around it ([`controller`]).

pub mod controller;
pub mod store;

pub use controller::{ApprovalQueueController, BulkActionResult, DetailState, FailedAction, RefreshThrottle};
pub use store::{ApprovalQueueStore, QueueCounts};
