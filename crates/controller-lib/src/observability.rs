//! Observability infrastructure for the controller
//!
//! Provides:
//! - Prometheus metrics (task runs, task latency, OOM pipeline throughput and loss)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for task durations (in seconds)
const TASK_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0,
];

/// Outcome label values for `cruise_task_runs_total`
pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const FAILURE: &str = "failure";
    pub const SKIPPED: &str = "skipped";
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    task_runs: IntCounterVec,
    task_duration_seconds: HistogramVec,
    tasks_running: IntGauge,
    oom_events_stored: IntCounter,
    oom_events_lost: IntCounter,
    oom_notifications_dropped: IntCounter,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            task_runs: register_int_counter_vec!(
                "cruise_task_runs_total",
                "Scheduled task firings by task name and outcome",
                &["task", "outcome"]
            )
            .expect("Failed to register task_runs_total"),

            task_duration_seconds: register_histogram_vec!(
                "cruise_task_duration_seconds",
                "Wall-clock time spent executing a scheduled task",
                &["task"],
                TASK_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register task_duration_seconds"),

            tasks_running: register_int_gauge!(
                "cruise_tasks_running",
                "Number of scheduled tasks currently executing"
            )
            .expect("Failed to register tasks_running"),

            oom_events_stored: register_int_counter!(
                "cruise_oom_events_stored_total",
                "OOM events persisted to the store"
            )
            .expect("Failed to register oom_events_stored_total"),

            oom_events_lost: register_int_counter!(
                "cruise_oom_events_lost_total",
                "OOM events dropped because persisting them failed"
            )
            .expect("Failed to register oom_events_lost_total"),

            oom_notifications_dropped: register_int_counter!(
                "cruise_oom_notifications_dropped_total",
                "OOM notifications dropped because the observer stream was full"
            )
            .expect("Failed to register oom_notifications_dropped_total"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Count a task firing with the given outcome
    pub fn inc_task_run(&self, task: &str, outcome: &str) {
        self.inner()
            .task_runs
            .with_label_values(&[task, outcome])
            .inc();
    }

    /// Current count of firings for a task/outcome pair
    pub fn task_runs(&self, task: &str, outcome: &str) -> u64 {
        self.inner()
            .task_runs
            .with_label_values(&[task, outcome])
            .get()
    }

    /// Record how long a task execution took
    pub fn observe_task_duration(&self, task: &str, duration_secs: f64) {
        self.inner()
            .task_duration_seconds
            .with_label_values(&[task])
            .observe(duration_secs);
    }

    pub fn inc_tasks_running(&self) {
        self.inner().tasks_running.inc();
    }

    pub fn dec_tasks_running(&self) {
        self.inner().tasks_running.dec();
    }

    pub fn inc_oom_events_stored(&self) {
        self.inner().oom_events_stored.inc();
    }

    pub fn inc_oom_events_lost(&self) {
        self.inner().oom_events_lost.inc();
    }

    pub fn inc_oom_notifications_dropped(&self) {
        self.inner().oom_notifications_dropped.inc();
    }
}

/// Structured logger for controller lifecycle and pipeline events
///
/// Keeps event names and field sets consistent across the binary and
/// the OOM pipeline so log queries stay stable.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_id: String,
}

impl StructuredLogger {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
        }
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str, engine: &str) {
        info!(
            event = "controller_started",
            cluster = %self.cluster_id,
            controller_version = %version,
            database_engine = %engine,
            "Cruise controller started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            cluster = %self.cluster_id,
            reason = %reason,
            "Cruise controller shutting down"
        );
    }

    /// Log how many configured tasks made it onto the scheduler
    pub fn log_tasks_scheduled(&self, scheduled: usize, configured: usize) {
        if scheduled == configured {
            info!(
                event = "tasks_scheduled",
                cluster = %self.cluster_id,
                scheduled = scheduled,
                "All configured tasks scheduled"
            );
        } else {
            warn!(
                event = "tasks_scheduled",
                cluster = %self.cluster_id,
                scheduled = scheduled,
                configured = configured,
                "Some configured tasks were not scheduled"
            );
        }
    }

    /// Log a persisted OOM event
    pub fn log_oom_stored(&self, container_id: &str, memory_bytes: u64) {
        info!(
            event = "oom_event_stored",
            cluster = %self.cluster_id,
            container_id = %container_id,
            memory_bytes = memory_bytes,
            "OOM event stored"
        );
    }

    /// Log an OOM event lost to a persistence failure
    pub fn log_oom_lost(&self, container_id: &str, error: &dyn std::error::Error) {
        warn!(
            event = "oom_event_lost",
            cluster = %self.cluster_id,
            container_id = %container_id,
            error = %error,
            "Failed to store OOM event, dropping it"
        );
    }

    /// Log the outcome of an OOM retention sweep
    pub fn log_oom_cleanup(&self, deleted: u64, retention_days: u32) {
        if deleted > 0 {
            info!(
                event = "oom_events_cleaned",
                cluster = %self.cluster_id,
                deleted = deleted,
                retention_days = retention_days,
                "Deleted old OOM events"
            );
        } else {
            debug!(
                event = "oom_events_cleaned",
                cluster = %self.cluster_id,
                retention_days = retention_days,
                "No old OOM events to clean up"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_metrics_creation() {
        let metrics = ControllerMetrics::new();

        metrics.observe_task_duration("metrics-test", 0.5);
        metrics.inc_tasks_running();
        metrics.dec_tasks_running();
        metrics.inc_oom_events_stored();
        metrics.inc_oom_events_lost();
        metrics.inc_oom_notifications_dropped();
    }

    #[test]
    fn test_task_run_counter_by_label() {
        let metrics = ControllerMetrics::new();
        let before = metrics.task_runs("metrics-label-test", outcome::SKIPPED);

        metrics.inc_task_run("metrics-label-test", outcome::SKIPPED);
        metrics.inc_task_run("metrics-label-test", outcome::SKIPPED);

        assert_eq!(
            metrics.task_runs("metrics-label-test", outcome::SKIPPED),
            before + 2
        );
        assert_eq!(
            metrics.task_runs("metrics-label-test", outcome::FAILURE),
            0
        );
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-cluster");
        assert_eq!(logger.cluster_id, "test-cluster");
    }
}
