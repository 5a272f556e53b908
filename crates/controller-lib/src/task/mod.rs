//! Periodic background tasks
//!
//! Every job the scheduler drives implements [`Task`]. The controller binary
//! assembles its tasks into an ordered `Vec<Arc<dyn Task>>` at startup.

mod cleanup_oom_events;

pub use cleanup_oom_events::CleanupOomEventsTask;

use crate::context::TaskContext;
use anyhow::Result;
use async_trait::async_trait;

/// Default name for the OOM retention task
pub const CLEANUP_OOM_EVENTS_TASK: &str = "cleanup_oom_events";

/// A named periodic job
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique name; the scheduler never runs two executions of one name at once
    fn name(&self) -> &str;

    /// Duration literal between firings, e.g. `"1h"`
    fn schedule(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Execute once. Errors are logged by the caller and never stop the schedule.
    async fn run(&self, ctx: TaskContext) -> Result<()>;
}
