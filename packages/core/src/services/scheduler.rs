//! Cron Scheduler for Background Jobs
//!
//! Provides named, cron-driven background tasks on the tokio runtime:
//! - One loop task per registered name, sleeping until the next firing
//! - Non-concurrent tasks are awaited inline, so a firing that falls due while
//!   the previous run is still going is skipped rather than overlapped
//! - Re-registering requires `unschedule` first; names are unique
//! - `unschedule` stops future firings only; a run already in progress
//!   finishes normally
//!
//! ## Expressions
//!
//! Expressions use the Quartz layout (`sec min hour day-of-month month
//! day-of-week [year]`). `?` is accepted as "no specific value", and plain
//! five-field cron expressions are run at second zero.

use crate::services::error::SchedulerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Work a scheduler can fire
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run(&self);
}

/// Registration options for a scheduled task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub name: String,
    pub expression: String,
    pub can_run_concurrently: bool,
}

impl ScheduleOptions {
    /// Options firing on a cron expression
    ///
    /// Defaults to an unnamed, concurrent task; set a name before scheduling.
    pub fn expr(expression: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            expression: expression.into(),
            can_run_concurrently: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn can_run_concurrently(mut self, concurrent: bool) -> Self {
        self.can_run_concurrently = concurrent;
        self
    }
}

/// Registers and removes named periodic tasks
pub trait Scheduler: Send + Sync {
    /// Register a task under `options.name`
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidExpression` if the expression does not parse
    /// - `SchedulerError::AlreadyScheduled` if the name is taken
    fn schedule(
        &self,
        task: Arc<dyn ScheduledTask>,
        options: ScheduleOptions,
    ) -> Result<(), SchedulerError>;

    /// Remove a task, returning whether one was registered
    fn unschedule(&self, name: &str) -> bool;
}

/// Parse a Quartz or five-field cron expression
pub fn parse_expression(expression: &str) -> Result<Schedule, SchedulerError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized: Vec<&str> = match fields.len() {
        5 => std::iter::once("0").chain(fields.iter().copied()).collect(),
        6 | 7 => fields,
        n => {
            return Err(SchedulerError::invalid_expression(
                expression,
                format!("expected 5 to 7 fields, found {}", n),
            ))
        }
    };
    let normalized = normalized
        .iter()
        .map(|field| if *field == "?" { "*" } else { *field })
        .collect::<Vec<_>>()
        .join(" ");

    Schedule::from_str(&normalized)
        .map_err(|e| SchedulerError::invalid_expression(expression, e.to_string()))
}

/// Shutdown handle of one firing loop
///
/// Dropping it closes the channel, which the loop observes the next time it
/// waits for a firing.
struct ScheduledLoop {
    _shutdown_tx: mpsc::Sender<()>,
}

/// Scheduler running each task in its own tokio loop
#[derive(Default)]
pub struct TokioScheduler {
    jobs: Mutex<HashMap<String, ScheduledLoop>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of registered tasks
    pub fn scheduled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs().keys().cloned().collect();
        names.sort();
        names
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, ScheduledLoop>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        task: Arc<dyn ScheduledTask>,
        options: ScheduleOptions,
    ) -> Result<(), SchedulerError> {
        let schedule = parse_expression(&options.expression)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            SchedulerError::NoRuntime {
                name: options.name.clone(),
            }
        })?;

        let mut jobs = self.jobs();
        if jobs.contains_key(&options.name) {
            return Err(SchedulerError::already_scheduled(&options.name));
        }

        tracing::debug!(
            "Scheduling task '{}' with expression '{}' (concurrent: {})",
            options.name,
            options.expression,
            options.can_run_concurrently
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        runtime.spawn(fire_loop(
            options.name.clone(),
            schedule,
            task,
            options.can_run_concurrently,
            shutdown_rx,
        ));
        jobs.insert(
            options.name,
            ScheduledLoop {
                _shutdown_tx: shutdown_tx,
            },
        );
        Ok(())
    }

    fn unschedule(&self, name: &str) -> bool {
        match self.jobs().remove(name) {
            Some(_) => {
                tracing::debug!("Unscheduled task '{}'", name);
                true
            }
            None => false,
        }
    }
}

async fn fire_loop(
    name: String,
    schedule: Schedule,
    task: Arc<dyn ScheduledTask>,
    can_run_concurrently: bool,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        let now = Utc::now();
        let from = match last_fired {
            Some(last) if last > now => last,
            _ => now,
        };
        let Some(next) = schedule.after(&from).next() else {
            tracing::info!("Task '{}' has no further firings", name);
            break;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                tracing::debug!("Task '{}' stopped", name);
                break;
            }

            _ = tokio::time::sleep(wait) => {}
        }
        last_fired = Some(next);

        tracing::trace!("Firing task '{}'", name);
        if can_run_concurrently {
            let task = task.clone();
            tokio::spawn(async move { task.run().await });
        } else {
            task.run().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTask {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        hold: Duration,
    }

    #[async_trait]
    impl ScheduledTask for CountingTask {
        async fn run(&self) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_parse_quartz_expression() {
        let schedule = parse_expression("0 0 * * * ?").unwrap();
        let first = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(first.format("%M:%S").to_string(), "00:00");
    }

    #[test]
    fn test_parse_five_field_expression() {
        let schedule = parse_expression("*/5 * * * *").unwrap();
        let first = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(first.format("%S").to_string(), "00");
    }

    #[test]
    fn test_parse_rejects_bad_expressions() {
        assert!(matches!(
            parse_expression("every hour"),
            Err(SchedulerError::InvalidExpression { .. })
        ));
        assert!(parse_expression("a b c d e f").is_err());
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn test_options_builder() {
        let options = ScheduleOptions::expr("0 0 * * * ?")
            .name("PageNodeCountJob")
            .can_run_concurrently(false);
        assert_eq!(options.name, "PageNodeCountJob");
        assert!(!options.can_run_concurrently);
    }

    #[test]
    fn test_schedule_requires_runtime() {
        let scheduler = TokioScheduler::new();
        let task: Arc<dyn ScheduledTask> = Arc::new(CountingTask::default());
        let result = scheduler.schedule(task, ScheduleOptions::expr("* * * * * ?").name("job"));
        assert!(matches!(result, Err(SchedulerError::NoRuntime { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_until_unscheduled() {
        let scheduler = TokioScheduler::new();
        let task: Arc<dyn ScheduledTask> = Arc::new(CountingTask::default());
        let options = ScheduleOptions::expr("0 0 * * * ?").name("job");

        scheduler.schedule(task.clone(), options.clone()).unwrap();
        assert_eq!(
            scheduler.schedule(task.clone(), options.clone()),
            Err(SchedulerError::already_scheduled("job"))
        );

        assert!(scheduler.unschedule("job"));
        assert!(!scheduler.unschedule("job"));
        scheduler.schedule(task, options).unwrap();
        assert_eq!(scheduler.scheduled_names(), vec!["job".to_string()]);
    }

    #[tokio::test]
    async fn test_fires_every_second() {
        let scheduler = TokioScheduler::new();
        let task = Arc::new(CountingTask::default());
        scheduler
            .schedule(task.clone(), ScheduleOptions::expr("* * * * * ?").name("tick"))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.unschedule("tick");

        assert!(task.runs.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_non_concurrent_runs_never_overlap() {
        let scheduler = TokioScheduler::new();
        let task = Arc::new(CountingTask {
            hold: Duration::from_millis(1500),
            ..Default::default()
        });
        scheduler
            .schedule(
                task.clone(),
                ScheduleOptions::expr("* * * * * ?")
                    .name("slow")
                    .can_run_concurrently(false),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(4000)).await;
        scheduler.unschedule("slow");

        assert!(task.runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(task.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unschedule_lets_running_task_finish() {
        let scheduler = TokioScheduler::new();
        let task = Arc::new(CountingTask {
            hold: Duration::from_millis(800),
            ..Default::default()
        });
        scheduler
            .schedule(
                task.clone(),
                ScheduleOptions::expr("* * * * * ?")
                    .name("job")
                    .can_run_concurrently(false),
            )
            .unwrap();

        for _ in 0..40 {
            if task.active.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(task.active.load(Ordering::SeqCst), 1);

        assert!(scheduler.unschedule("job"));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // The in-flight run completed and no further firing started
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.active.load(Ordering::SeqCst), 0);
    }
}
