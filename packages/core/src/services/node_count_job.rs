//! Periodic Page Node Count Job
//!
//! Owns the configuration and the single scheduler registration of the node
//! count traversal. Each firing opens a session for the `nodecount-updater`
//! service user, resolves the configured root and hands off to
//! `NodeCountWalker`.
//!
//! ## Lifecycle
//!
//! ```text
//! Unconfigured --activate/modified--> Scheduled (enabled) | Idle (disabled)
//! Scheduled | Idle --activate/modified--> Scheduled | Idle
//! any --deactivate--> Unregistered
//! ```
//!
//! Every activation unschedules the previous registration before scheduling
//! again, so re-configuring is idempotent. The registration is
//! non-concurrent; overlapping firings are the scheduler's problem, not the
//! job's.
//!
//! ## Failure Handling
//!
//! No failure inside a run escapes `execute`. Login failures, a missing root
//! and unexpected repository errors are logged and reported through
//! `RunStatus`; the next firing retries naturally.

use crate::config::PageNodeCountConfig;
use crate::db::{RepositorySession, SessionFactory};
use crate::services::node_count::{NodeCountWalker, TraversalReport};
use crate::services::scheduler::{ScheduleOptions, ScheduledTask, Scheduler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Name the job is registered under
pub const JOB_NAME: &str = "PageNodeCountJob";

/// Sub-service mapped to the technical user that writes counts
pub const SERVICE_USER: &str = "nodecount-updater";

/// Registration state of the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Unconfigured,
    Scheduled,
    Idle,
    Unregistered,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The whole tree below the root was walked
    Completed,
    /// The job is disabled or not configured; nothing was read
    Disabled,
    /// No session could be opened
    SessionUnavailable(String),
    /// The configured root does not exist
    RootNotFound(String),
    /// An unexpected failure stopped the walk early
    Aborted(String),
}

/// Result of one firing
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub root_path: String,
    pub status: RunStatus,
    pub report: TraversalReport,
}

impl RunSummary {
    /// Pages whose count was committed during this run
    pub fn pages_processed(&self) -> usize {
        self.report.pages_processed()
    }
}

#[derive(Debug)]
struct JobInner {
    config: Option<PageNodeCountConfig>,
    state: JobState,
}

/// Scheduled recomputation of page node counts
pub struct PageNodeCountJob {
    sessions: Arc<dyn SessionFactory>,
    scheduler: Arc<dyn Scheduler>,
    inner: RwLock<JobInner>,
}

impl PageNodeCountJob {
    /// Create an unconfigured job
    ///
    /// Nothing is scheduled until `activate` is called.
    pub fn new(sessions: Arc<dyn SessionFactory>, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            scheduler,
            inner: RwLock::new(JobInner {
                config: None,
                state: JobState::Unconfigured,
            }),
        })
    }

    /// Apply a configuration and (re-)register the scheduled task
    pub fn activate(self: &Arc<Self>, config: PageNodeCountConfig) -> JobState {
        tracing::info!(
            "Activating {} - enabled: {}, rootPath: {}, expression: {}",
            JOB_NAME,
            config.enabled,
            config.root_path,
            config.scheduler_expression
        );

        self.scheduler.unschedule(JOB_NAME);

        let enabled = config.enabled;
        let expression = config.scheduler_expression.clone();
        let validation = config.validate();
        self.write_inner().config = Some(config);

        let state = if !enabled {
            tracing::info!("{} is disabled via configuration", JOB_NAME);
            JobState::Idle
        } else if let Err(reason) = validation {
            tracing::error!("{} not scheduled, invalid configuration: {}", JOB_NAME, reason);
            JobState::Idle
        } else {
            let options = ScheduleOptions::expr(&expression)
                .name(JOB_NAME)
                .can_run_concurrently(false);
            let task: Arc<dyn ScheduledTask> = self.clone();
            match self.scheduler.schedule(task, options) {
                Ok(()) => {
                    tracing::info!(
                        "{} successfully scheduled with cron expression: {}",
                        JOB_NAME,
                        expression
                    );
                    JobState::Scheduled
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to schedule {} with expression {}: {}",
                        JOB_NAME,
                        expression,
                        e
                    );
                    JobState::Idle
                }
            }
        };

        self.write_inner().state = state;
        state
    }

    /// Re-apply a changed configuration
    pub fn modified(self: &Arc<Self>, config: PageNodeCountConfig) -> JobState {
        self.activate(config)
    }

    /// Remove the scheduled task
    pub fn deactivate(&self) -> JobState {
        tracing::info!("Deactivating {}", JOB_NAME);
        self.scheduler.unschedule(JOB_NAME);
        self.write_inner().state = JobState::Unregistered;
        tracing::info!("{} unscheduled", JOB_NAME);
        JobState::Unregistered
    }

    pub fn state(&self) -> JobState {
        self.read_inner().state
    }

    /// Configuration applied by the last activation
    pub fn config(&self) -> Option<PageNodeCountConfig> {
        self.read_inner().config.clone()
    }

    /// Run the traversal once with the current configuration
    ///
    /// This is what each scheduled firing calls. The session is opened here
    /// and released before returning on every path.
    pub async fn execute(&self) -> RunSummary {
        let started_at = Utc::now();
        let started = Instant::now();

        let config = match self.config() {
            Some(config) if config.enabled => config,
            Some(config) => {
                tracing::debug!("{} skipped - job is disabled", JOB_NAME);
                return Self::summary(started_at, started, config.root_path, RunStatus::Disabled);
            }
            None => {
                tracing::debug!("{} skipped - job is not configured", JOB_NAME);
                return Self::summary(started_at, started, String::new(), RunStatus::Disabled);
            }
        };

        tracing::info!(
            "Starting {} execution for root path: {}",
            JOB_NAME,
            config.root_path
        );

        let (status, report) = match self.sessions.service_session(SERVICE_USER).await {
            Ok(mut session) => {
                tracing::debug!("Repository session opened as '{}'", session.user_id());
                Self::count_pages(session.as_mut(), &config.root_path).await
            }
            Err(e) => {
                tracing::error!(
                    "Failed to obtain repository session. Check service user configuration: {}",
                    e
                );
                (RunStatus::SessionUnavailable(e.to_string()), TraversalReport::default())
            }
        };

        let duration = started.elapsed();
        if status == RunStatus::Completed {
            tracing::info!(
                "{} completed successfully. Pages processed: {}, Duration: {} ms",
                JOB_NAME,
                report.pages_processed(),
                duration.as_millis()
            );
        }

        RunSummary {
            started_at,
            duration,
            root_path: config.root_path,
            status,
            report,
        }
    }

    async fn count_pages(
        session: &mut dyn RepositorySession,
        root_path: &str,
    ) -> (RunStatus, TraversalReport) {
        let root = match session.get_node(root_path).await {
            Ok(Some(root)) => root,
            Ok(None) => {
                tracing::warn!("Root path not found: {}. Job execution aborted.", root_path);
                return (
                    RunStatus::RootNotFound(root_path.to_string()),
                    TraversalReport::default(),
                );
            }
            Err(e) => {
                tracing::error!(
                    "Unexpected error running {} for path {}: {}",
                    JOB_NAME,
                    root_path,
                    e
                );
                return (RunStatus::Aborted(e.to_string()), TraversalReport::default());
            }
        };

        tracing::debug!("Root resource found: {}. Starting page traversal...", root_path);

        let mut walker = NodeCountWalker::new(session);
        let result = walker.walk(&root).await;
        let report = walker.into_report();

        match result {
            Ok(()) => (RunStatus::Completed, report),
            Err(e) => {
                tracing::error!(
                    "Unexpected error running {} for path {} after {} page(s): {}",
                    JOB_NAME,
                    root_path,
                    report.pages_processed(),
                    e
                );
                (RunStatus::Aborted(e.to_string()), report)
            }
        }
    }

    fn summary(
        started_at: DateTime<Utc>,
        started: Instant,
        root_path: String,
        status: RunStatus,
    ) -> RunSummary {
        RunSummary {
            started_at,
            duration: started.elapsed(),
            root_path,
            status,
            report: TraversalReport::default(),
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, JobInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, JobInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ScheduledTask for PageNodeCountJob {
    async fn run(&self) {
        self.execute().await;
    }
}

#[cfg(test)]
#[path = "node_count_job_test.rs"]
mod node_count_job_test;
