//! Business Services
//!
//! This module contains the services built on the repository layer:
//!
//! - `NodeCountWalker` - Traversal writing scoped node counts onto page content roots
//! - `PageNodeCountJob` - Scheduled, non-concurrent runs of the traversal
//! - `TokioScheduler` - Cron-driven task scheduler on the tokio runtime
//! - `InfoProvider` - Read-side lookup of stored page metrics for the listing view

pub mod error;
pub mod info_provider;
pub mod node_count;
pub mod node_count_job;
pub mod scheduler;

pub use error::{NodeCountError, SchedulerError};
pub use info_provider::{InfoProvider, COMPLEXITY_PROVIDER, NODE_COUNT_PROVIDER};
pub use node_count::{
    count_scoped_descendants, process_subtree, FailureReason, NodeCountWalker, PageOutcome,
    SkipReason, TraversalReport,
};
pub use node_count_job::{
    JobState, PageNodeCountJob, RunStatus, RunSummary, JOB_NAME, SERVICE_USER,
};
pub use scheduler::{parse_expression, ScheduleOptions, ScheduledTask, Scheduler, TokioScheduler};
