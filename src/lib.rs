//! Workflow sync — library crate.
//!
//! Transition requests, the approval queue, per-entity history and the
//! realtime channel that keeps the queue fresh. Re-exports modules needed by
//! integration tests in `tests/`.

pub mod backoff;
pub mod config;
pub mod errors;
pub mod history;
pub mod models;
pub mod queue;
pub mod realtime;
pub mod service;
pub mod transport;
