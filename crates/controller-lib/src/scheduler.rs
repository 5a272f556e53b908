//! Periodic task scheduler
//!
//! Each scheduled job gets its own tokio task driving a ticker. A job fires
//! once as soon as it is scheduled and then once per period. Firings of the
//! same name never overlap: if a previous execution is still running the tick
//! is dropped, not queued. Missed ticks are never made up.
//!
//! Stopping is cooperative. Once [`Scheduler::stop`] returns no new execution
//! starts, while executions already in flight run to completion.

use crate::context::TaskContext;
use crate::observability::{outcome, ControllerMetrics};
use crate::task::Task;
use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid schedule {schedule:?} for task {task}: {reason}")]
    InvalidSchedule {
        task: String,
        schedule: String,
        reason: String,
    },

    #[error("scheduler is stopped")]
    Stopped,
}

/// Result of a single firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    /// A previous execution of the same task was still running
    Skipped,
}

/// Parse a duration literal such as `"1h"`, `"30m"` or `"1h 30m"`
pub fn parse_schedule(spec: &str) -> Result<Duration, String> {
    let period = humantime::parse_duration(spec.trim()).map_err(|e| e.to_string())?;
    if period.is_zero() {
        return Err("period must be greater than zero".to_string());
    }
    Ok(period)
}

/// Runs named periodic jobs with skip-on-overlap semantics.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    /// Names with an execution in flight
    running: Mutex<HashSet<String>>,
    /// Period of every successfully scheduled job
    scheduled: DashMap<String, Duration>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    metrics: ControllerMetrics,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                running: Mutex::new(HashSet::new()),
                scheduled: DashMap::new(),
                shutdown: CancellationToken::new(),
                stopped: AtomicBool::new(false),
                metrics: ControllerMetrics::new(),
            }),
        }
    }

    /// Start firing `task_fn` every `schedule_spec`.
    ///
    /// An unparseable or zero schedule is logged and leaves the task
    /// unscheduled; other tasks are unaffected.
    pub fn schedule_task<F, Fut>(
        &self,
        ctx: TaskContext,
        name: &str,
        schedule_spec: &str,
        task_fn: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.is_stopped() {
            warn!(task = %name, "Scheduler is stopped, not scheduling task");
            return Err(SchedulerError::Stopped);
        }

        let period = match parse_schedule(schedule_spec) {
            Ok(period) => period,
            Err(reason) => {
                error!(
                    task = %name,
                    schedule = %schedule_spec,
                    error = %reason,
                    "Failed to parse schedule"
                );
                return Err(SchedulerError::InvalidSchedule {
                    task: name.to_string(),
                    schedule: schedule_spec.to_string(),
                    reason,
                });
            }
        };

        self.inner.scheduled.insert(name.to_string(), period);
        info!(
            task = %name,
            period_secs = period.as_secs_f64(),
            "Task scheduled"
        );

        let inner = self.inner.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            inner.run_loop(ctx, name, period, Arc::new(task_fn)).await;
        });

        Ok(())
    }

    /// Schedule a [`Task`], returning whether it was scheduled.
    /// Disabled tasks are skipped.
    pub fn schedule(&self, ctx: TaskContext, task: Arc<dyn Task>) -> Result<bool, SchedulerError> {
        if !task.is_enabled() {
            info!(task = %task.name(), "Task is disabled, not scheduling");
            return Ok(false);
        }

        let name = task.name().to_string();
        let schedule = task.schedule().to_string();
        self.schedule_task(ctx, &name, &schedule, move |ctx| {
            let task = task.clone();
            async move { task.run(ctx).await }
        })?;

        Ok(true)
    }

    /// Scheduled job names and periods, sorted by name
    pub fn scheduled_tasks(&self) -> Vec<(String, Duration)> {
        let mut tasks: Vec<_> = self
            .inner
            .scheduled
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        tasks.sort();
        tasks
    }

    /// True while an execution of `name` is in flight
    pub fn is_running(&self, name: &str) -> bool {
        self.inner.lock_running().contains(name)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once [`stop`](Self::stop) has been called
    pub async fn wait(&self) {
        info!("Scheduler started");
        self.inner.shutdown.cancelled().await;
    }

    /// Signal every job loop to exit. Safe to call more than once.
    pub fn stop(&self) {
        // Flipped under the running lock so no admission can race past it
        let _running = self.inner.lock_running();
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already stopped");
            return;
        }

        info!("Stopping scheduler");
        self.inner.shutdown.cancel();
    }
}

/// Admission decision for one firing
enum Admission<'a> {
    Run(RunningGuard<'a>),
    Busy,
    Stopped,
}

/// Clears the running mark on every exit path
struct RunningGuard<'a> {
    inner: &'a SchedulerInner,
    name: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.inner.lock_running().remove(&self.name);
        self.inner.metrics.dec_tasks_running();
    }
}

impl SchedulerInner {
    fn lock_running(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn admit(&self, name: &str) -> Admission<'_> {
        let mut running = self.lock_running();
        if self.stopped.load(Ordering::SeqCst) {
            return Admission::Stopped;
        }
        if !running.insert(name.to_string()) {
            return Admission::Busy;
        }
        drop(running);

        self.metrics.inc_tasks_running();
        Admission::Run(RunningGuard {
            inner: self,
            name: name.to_string(),
        })
    }

    async fn run_loop<F, Fut>(
        self: Arc<Self>,
        ctx: TaskContext,
        name: String,
        period: Duration,
        task_fn: Arc<F>,
    ) where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        // First tick completes immediately
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(task = %name, "Task loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if self.execute(&ctx, &name, task_fn.as_ref()).await.is_none() {
                        break;
                    }
                }
            }
        }
    }

    /// Fire once. Returns `None` when the scheduler has been stopped.
    async fn execute<F, Fut>(&self, ctx: &TaskContext, name: &str, task_fn: &F) -> Option<RunOutcome>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let _guard = match self.admit(name) {
            Admission::Run(guard) => guard,
            Admission::Busy => {
                info!(task = %name, "Task is already running, skipping execution");
                self.metrics.inc_task_run(name, outcome::SKIPPED);
                return Some(RunOutcome::Skipped);
            }
            Admission::Stopped => return None,
        };

        let run_ctx = ctx.clone().with_task(name);
        let span = run_ctx.span();
        info!(parent: &span, "Launching task");

        let start = Instant::now();
        // Spawned so a panicking task cannot take the loop down with it
        let result = tokio::spawn(task_fn(run_ctx).instrument(span.clone())).await;
        let elapsed = start.elapsed();
        self.metrics.observe_task_duration(name, elapsed.as_secs_f64());

        let run_outcome = match result {
            Ok(Ok(())) => {
                debug!(
                    parent: &span,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Task completed"
                );
                RunOutcome::Succeeded
            }
            Ok(Err(e)) => {
                error!(parent: &span, error = %format!("{e:#}"), "Failed to run task");
                RunOutcome::Failed
            }
            Err(e) => {
                error!(parent: &span, error = %e, "Task panicked");
                RunOutcome::Failed
            }
        };

        let label = match run_outcome {
            RunOutcome::Succeeded => outcome::SUCCESS,
            _ => outcome::FAILURE,
        };
        self.metrics.inc_task_run(name, label);

        Some(run_outcome)
    }
}
