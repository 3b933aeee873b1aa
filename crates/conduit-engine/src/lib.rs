//! Core orchestration crate for Conduit sync execution.
//!
//! The [`Coordinator`] turns a trigger into a locked, per-stream parallel run;
//! the [`Scheduler`] fires triggers from cron schedules; the
//! [`ConnectionService`] owns validated connection administration.

pub mod checkpoint;
pub mod config;
pub mod connections;
pub mod coordinator;
pub mod cron;
pub mod errors;
pub mod progress;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub(crate) mod store;
pub mod validator;
pub(crate) mod worker;

// Re-export public API for convenience
pub use connections::ConnectionService;
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use errors::{CancelReason, Rejected, RetryPolicy, SyncError};
pub use registry::{ConnectorRegistry, ConnectorSpec};
pub use scheduler::{Scheduler, SyncTrigger};
