//! Multi-tenant workload stat store
//!
//! Stats and their override overlays are addressed by `(cluster_id,
//! workload_id)`; OOM events live in a companion append-only table. Two
//! engines implement the same schema and operations:
//! - SQLite, embedded single file (or in-memory for tests)
//! - PostgreSQL, networked
//!
//! The engine is picked once by [`connect`] and never re-dispatched.
//! Timestamps are stored as unix epoch milliseconds in both engines.

mod postgres;
mod sqlite;

#[cfg(test)]
mod tests;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::config::{ConfigError, DatabaseConfig, DatabaseEngine};
use crate::models::{OomEvent, Overrides, WorkloadStat};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Store failures surfaced to direct callers
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workload stat not found for cluster {cluster_id}, workload {workload_id}")]
    StatNotFound {
        cluster_id: String,
        workload_id: String,
    },

    #[error("failed to encode or decode blob: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    #[error("{field} value {value} does not fit in a BIGINT column")]
    OutOfRange { field: &'static str, value: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::StatNotFound { .. })
    }

    fn stat_not_found(cluster_id: &str, workload_id: &str) -> Self {
        StoreError::StatNotFound {
            cluster_id: cluster_id.to_string(),
            workload_id: workload_id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Workload stats and override overlays
#[async_trait]
pub trait StatStore: Send + Sync {
    /// Insert or overwrite the stat for a key. Last write wins; the overrides
    /// blob of an existing row is left untouched.
    async fn upsert_stat(
        &self,
        cluster_id: &str,
        workload_id: &str,
        stat: &WorkloadStat,
        generated_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn get_stat_count_for_cluster(&self, cluster_id: &str) -> StoreResult<u64>;

    async fn get_stat_count_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
    ) -> StoreResult<u64>;

    async fn has_stat_for_cluster(&self, cluster_id: &str) -> StoreResult<bool> {
        Ok(self.get_stat_count_for_cluster(cluster_id).await? > 0)
    }

    async fn has_stat_for_workload(&self, cluster_id: &str, workload_id: &str) -> StoreResult<bool> {
        Ok(self
            .get_stat_count_for_workload(cluster_id, workload_id)
            .await?
            > 0)
    }

    /// Fetch one stat. `updated_at` on the result is the row's write time.
    async fn get_stat_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
    ) -> StoreResult<WorkloadStat>;

    /// All stats for a cluster, most recently updated first
    async fn get_stats_for_cluster(&self, cluster_id: &str) -> StoreResult<Vec<WorkloadStat>>;

    async fn get_stat_overrides_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
    ) -> StoreResult<Overrides>;

    /// Replace the overrides of an existing row. Never creates a row.
    async fn update_stat_overrides_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
        overrides: &Overrides,
    ) -> StoreResult<()>;

    async fn delete_stat_for_workload(&self, cluster_id: &str, workload_id: &str)
        -> StoreResult<()>;

    /// Remove every stat of a cluster, returning how many rows went away
    async fn delete_stats_for_cluster(&self, cluster_id: &str) -> StoreResult<u64>;

    /// True if the key has a stat generated within the last `within_minutes`
    async fn has_recent_stat(
        &self,
        cluster_id: &str,
        workload_id: &str,
        within_minutes: u32,
    ) -> StoreResult<bool>;
}

/// Append-only OOM event audit log
#[async_trait]
pub trait OomEventStore: Send + Sync {
    /// Persist an event, returning its assigned id
    async fn insert_oom_event(&self, event: &OomEvent) -> StoreResult<i64>;

    /// Delete a cluster's events older than `retention_days`
    async fn delete_old_oom_events(&self, cluster_id: &str, retention_days: u32)
        -> StoreResult<u64>;

    /// A cluster's events in insertion order
    async fn list_oom_events(&self, cluster_id: &str) -> StoreResult<Vec<OomEvent>>;
}

/// A complete backing engine
#[async_trait]
pub trait Database: StatStore + OomEventStore {
    fn engine(&self) -> DatabaseEngine;

    /// Close the underlying connection pool
    async fn close(&self);
}

/// Open the engine selected by `config`, creating tables if absent
pub async fn connect(config: &DatabaseConfig) -> StoreResult<Arc<dyn Database>> {
    config.validate()?;

    match config.engine {
        DatabaseEngine::Sqlite => Ok(Arc::new(SqliteStore::connect(config).await?)),
        DatabaseEngine::Postgres => Ok(Arc::new(PostgresStore::connect(config).await?)),
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(StoreError::InvalidTimestamp(ms))
}

pub(crate) fn now_millis() -> i64 {
    to_millis(Utc::now())
}

/// Cutoff in millis for "newer than `minutes` ago"
pub(crate) fn minutes_ago_millis(minutes: u32) -> i64 {
    to_millis(Utc::now() - Duration::minutes(i64::from(minutes)))
}

/// Cutoff in millis for "older than `days` ago"
pub(crate) fn days_ago_millis(days: u32) -> i64 {
    to_millis(Utc::now() - Duration::days(i64::from(days)))
}

pub(crate) fn memory_to_column(memory_bytes: u64) -> StoreResult<i64> {
    i64::try_from(memory_bytes).map_err(|_| StoreError::OutOfRange {
        field: "memory",
        value: memory_bytes,
    })
}

pub(crate) fn decode_stat(stats: &str, updated_at: i64) -> StoreResult<WorkloadStat> {
    let mut stat: WorkloadStat = serde_json::from_str(stats)?;
    stat.updated_at = from_millis(updated_at)?;
    Ok(stat)
}

/// Column tuple shared by both engines' OOM event reads
pub(crate) type OomEventRow = (i64, String, String, i64, i64);

pub(crate) fn decode_oom_event(row: OomEventRow) -> StoreResult<OomEvent> {
    let (id, cluster_id, container_id, timestamp, memory) = row;
    Ok(OomEvent {
        id,
        cluster_id,
        container_id,
        timestamp: from_millis(timestamp)?,
        memory_bytes: memory.max(0) as u64,
    })
}
