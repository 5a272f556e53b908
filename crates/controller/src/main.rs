//! Cruise Controller - workload stat and OOM event controller
//!
//! Runs once per cluster, scheduling background maintenance tasks and
//! recording OOM kills into the shared workload-stat store.

use anyhow::{Context, Result};
use controller_lib::{
    store, CleanupOomEventsTask, ControllerConfig, ControllerMetrics, Database, OomObserver,
    OomProcessor, Scheduler, StructuredLogger, Task, TaskContext,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Grace period for the OOM processor to drain after stop
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cruise-controller");

    let config = config::load()?;
    info!(
        cluster = %config.cluster_id,
        database_engine = config.database.engine.as_str(),
        "Controller configured"
    );

    // Register metrics before anything records into them
    let _metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new(config.cluster_id.as_str());

    let db = store::connect(&config.database)
        .await
        .context("failed to open workload stat store")?;
    logger.log_startup(CONTROLLER_VERSION, db.engine().as_str());

    let ctx = CancellationToken::new();
    let base_ctx = TaskContext::new().with_cluster(config.cluster_id.as_str());

    let scheduler = Scheduler::new();
    let tasks = build_tasks(&config, db.clone());
    let scheduled = schedule_tasks(&scheduler, &base_ctx, &tasks);
    logger.log_tasks_scheduled(scheduled, tasks.iter().filter(|t| t.is_enabled()).count());

    let observer = OomObserver::new(config.oom.channel_capacity);
    // Held for the lifetime of the process; node watchers push through clones
    let _reporter = observer.reporter();
    let processor = OomProcessor::new(db.clone(), config.cluster_id.as_str());
    let processor_handle = processor.start(ctx.child_token(), observer);

    let waiter = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.wait().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");

    processor.stop();
    scheduler.stop();
    ctx.cancel();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, processor_handle)
        .await
        .is_err()
    {
        warn!("OOM processor did not stop in time");
    }
    let _ = waiter.await;

    db.close().await;
    info!("Shutdown complete");

    Ok(())
}

/// Every task this controller knows about, in scheduling order
fn build_tasks(config: &ControllerConfig, db: Arc<dyn Database>) -> Vec<Arc<dyn Task>> {
    let cleanup_oom_events: Arc<dyn Task> = Arc::new(CleanupOomEventsTask::new(
        controller_lib::task::CLEANUP_OOM_EVENTS_TASK,
        config.cluster_id.as_str(),
        config.tasks.cleanup_oom_events.clone(),
        db,
    ));

    vec![cleanup_oom_events]
}

/// Schedule enabled tasks, returning how many were scheduled.
/// A task with a bad schedule is logged and skipped.
fn schedule_tasks(scheduler: &Scheduler, ctx: &TaskContext, tasks: &[Arc<dyn Task>]) -> usize {
    let mut scheduled = 0;
    for task in tasks {
        match scheduler.schedule(ctx.clone(), task.clone()) {
            Ok(true) => scheduled += 1,
            Ok(false) => {}
            Err(e) => warn!(task = %task.name(), error = %e, "Task not scheduled"),
        }
    }
    scheduled
}
