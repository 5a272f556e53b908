//! Controller library for workload rightsizing
//!
//! This crate provides the core functionality for:
//! - Persisting per-workload resource stats and operator overrides
//! - Scheduling periodic background tasks without overlap
//! - Recording OOM kill events as they are observed
//! - Configuration, context propagation and observability

pub mod config;
pub mod context;
pub mod models;
pub mod observability;
pub mod oom;
pub mod scheduler;
pub mod store;
pub mod task;

pub use config::{ConfigError, ControllerConfig, DatabaseConfig, DatabaseEngine};
pub use context::TaskContext;
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use oom::{OomObserver, OomProcessor, OomReporter};
pub use scheduler::{RunOutcome, Scheduler, SchedulerError};
pub use store::{connect, Database, OomEventStore, StatStore, StoreError, StoreResult};
pub use task::{CleanupOomEventsTask, Task};
