//! SQLite engine

use super::{
    days_ago_millis, decode_oom_event, decode_stat, memory_to_column, minutes_ago_millis,
    now_millis, to_millis, Database, OomEventRow, OomEventStore, StatStore, StoreError,
    StoreResult,
};
use crate::config::{DatabaseConfig, DatabaseEngine};
use crate::models::{OomEvent, Overrides, WorkloadStat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

const MEMORY_PATH: &str = ":memory:";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cluster_id TEXT NOT NULL,
        workload_id TEXT NOT NULL,
        stats TEXT NOT NULL,
        generated_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        overrides TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_stats_cluster_workload ON stats (cluster_id, workload_id)",
    "CREATE INDEX IF NOT EXISTS idx_stats_cluster_updated ON stats (cluster_id, updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_stats_cluster_generated ON stats (cluster_id, generated_at)",
    r#"
    CREATE TABLE IF NOT EXISTS oom_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cluster_id TEXT NOT NULL,
        container_id TEXT NOT NULL,
        "timestamp" INTEGER NOT NULL,
        memory INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_oom_events_cluster_timestamp ON oom_events (cluster_id, "timestamp")"#,
];

/// Embedded single-file store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database described by `config`
    #[instrument(skip(config), fields(path = %config.path))]
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        if config.path == MEMORY_PATH {
            return Self::in_memory().await;
        }

        let path = Path::new(&config.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Storage(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_tables().await?;
        info!("SQLite store ready");
        Ok(store)
    }

    /// Private in-memory database. Pinned to one connection that never
    /// expires, since each SQLite connection sees its own memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ensured");
        Ok(())
    }
}

#[async_trait]
impl StatStore for SqliteStore {
    async fn upsert_stat(
        &self,
        cluster_id: &str,
        workload_id: &str,
        stat: &WorkloadStat,
        generated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let stats_json = serde_json::to_string(stat)?;
        let now = now_millis();

        sqlx::query(
            r#"
            INSERT INTO stats (cluster_id, workload_id, stats, generated_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (cluster_id, workload_id) DO UPDATE SET
                stats = excluded.stats,
                generated_at = excluded.generated_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(cluster_id)
        .bind(workload_id)
        .bind(stats_json)
        .bind(to_millis(generated_at))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_stat_count_for_cluster(&self, cluster_id: &str) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stats WHERE cluster_id = ?")
            .bind(cluster_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn get_stat_count_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
    ) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stats WHERE cluster_id = ? AND workload_id = ?",
        )
        .bind(cluster_id)
        .bind(workload_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn get_stat_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
    ) -> StoreResult<WorkloadStat> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT stats, updated_at FROM stats WHERE cluster_id = ? AND workload_id = ?",
        )
        .bind(cluster_id)
        .bind(workload_id)
        .fetch_optional(&self.pool)
        .await?;

        let (stats, updated_at) =
            row.ok_or_else(|| StoreError::stat_not_found(cluster_id, workload_id))?;
        decode_stat(&stats, updated_at)
    }

    async fn get_stats_for_cluster(&self, cluster_id: &str) -> StoreResult<Vec<WorkloadStat>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT stats, updated_at FROM stats WHERE cluster_id = ? ORDER BY updated_at DESC, id DESC",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|(stats, updated_at)| decode_stat(stats, *updated_at))
            .collect()
    }

    async fn get_stat_overrides_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
    ) -> StoreResult<Overrides> {
        let overrides: Option<String> = sqlx::query_scalar(
            "SELECT overrides FROM stats WHERE cluster_id = ? AND workload_id = ?",
        )
        .bind(cluster_id)
        .bind(workload_id)
        .fetch_optional(&self.pool)
        .await?;

        let overrides =
            overrides.ok_or_else(|| StoreError::stat_not_found(cluster_id, workload_id))?;
        Ok(serde_json::from_str(&overrides)?)
    }

    async fn update_stat_overrides_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
        overrides: &Overrides,
    ) -> StoreResult<()> {
        let overrides_json = serde_json::to_string(overrides)?;

        let result = sqlx::query(
            "UPDATE stats SET overrides = ?, updated_at = ? WHERE cluster_id = ? AND workload_id = ?",
        )
        .bind(overrides_json)
        .bind(now_millis())
        .bind(cluster_id)
        .bind(workload_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::stat_not_found(cluster_id, workload_id));
        }
        Ok(())
    }

    async fn delete_stat_for_workload(
        &self,
        cluster_id: &str,
        workload_id: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM stats WHERE cluster_id = ? AND workload_id = ?")
            .bind(cluster_id)
            .bind(workload_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::stat_not_found(cluster_id, workload_id));
        }
        Ok(())
    }

    async fn delete_stats_for_cluster(&self, cluster_id: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM stats WHERE cluster_id = ?")
            .bind(cluster_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn has_recent_stat(
        &self,
        cluster_id: &str,
        workload_id: &str,
        within_minutes: u32,
    ) -> StoreResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stats WHERE cluster_id = ? AND workload_id = ? AND generated_at > ?",
        )
        .bind(cluster_id)
        .bind(workload_id)
        .bind(minutes_ago_millis(within_minutes))
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl OomEventStore for SqliteStore {
    async fn insert_oom_event(&self, event: &OomEvent) -> StoreResult<i64> {
        let now = now_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO oom_events (cluster_id, container_id, "timestamp", memory, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.cluster_id)
        .bind(&event.container_id)
        .bind(to_millis(event.timestamp))
        .bind(memory_to_column(event.memory_bytes)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn delete_old_oom_events(
        &self,
        cluster_id: &str,
        retention_days: u32,
    ) -> StoreResult<u64> {
        let result =
            sqlx::query(r#"DELETE FROM oom_events WHERE cluster_id = ? AND "timestamp" < ?"#)
                .bind(cluster_id)
                .bind(days_ago_millis(retention_days))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn list_oom_events(&self, cluster_id: &str) -> StoreResult<Vec<OomEvent>> {
        let rows: Vec<OomEventRow> = sqlx::query_as(
            r#"SELECT id, cluster_id, container_id, "timestamp", memory FROM oom_events WHERE cluster_id = ? ORDER BY id ASC"#,
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_oom_event).collect()
    }
}

#[async_trait]
impl Database for SqliteStore {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Sqlite
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
