//! Store behaviour tests
//!
//! Every scenario is written against `&dyn Database` and runs on an
//! in-memory SQLite store. When `CRUISE_TEST_POSTGRES_URL` is set the same
//! scenarios also run against that PostgreSQL instance.

use super::*;
use crate::config::DatabaseConfig;
use crate::models::{ContainerStats, EvictionRanking, OomEvent, OriginalContainerResources};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

fn sample_stat(workload_id: &str) -> WorkloadStat {
    WorkloadStat {
        workload_identifier: workload_id.to_string(),
        kind: "Deployment".to_string(),
        namespace: "default".to_string(),
        name: "test-app".to_string(),
        creation_time: Utc::now(),
        updated_at: Utc::now(),
        replicas: 1,
        eviction_ranking: EvictionRanking::Medium,
        container_stats: vec![ContainerStats {
            container_name: "app".to_string(),
            ..Default::default()
        }],
        original_container_resources: vec![OriginalContainerResources {
            name: "app".to_string(),
            cpu_request: 0.5,
            cpu_limit: 1.0,
            memory_request: 256.0 * 1024.0 * 1024.0,
            memory_limit: 512.0 * 1024.0 * 1024.0,
        }],
    }
}

/// Cluster id that will not collide with other tests sharing a database
fn unique_cluster(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}-{}", prefix, nanos)
}

fn oom_event(cluster_id: &str, container_id: &str, age: ChronoDuration, memory: u64) -> OomEvent {
    OomEvent {
        id: 0,
        cluster_id: cluster_id.to_string(),
        container_id: container_id.to_string(),
        timestamp: Utc::now() - age,
        memory_bytes: memory,
    }
}

async fn upsert_then_read(store: &dyn Database) {
    let cluster = unique_cluster("upsert");

    store
        .upsert_stat(&cluster, "w1", &sample_stat("w1"), Utc::now())
        .await
        .unwrap();

    assert!(store.has_stat_for_workload(&cluster, "w1").await.unwrap());
    assert!(store.has_stat_for_cluster(&cluster).await.unwrap());

    let stat = store.get_stat_for_workload(&cluster, "w1").await.unwrap();
    assert_eq!(stat.workload_identifier, "w1");
    assert_eq!(stat.kind, "Deployment");
    assert_eq!(stat.replicas, 1);
    assert_eq!(stat.eviction_ranking, EvictionRanking::Medium);
    assert_eq!(stat.container_stats.len(), 1);
}

async fn repeated_upsert_updates_in_place(store: &dyn Database) {
    let cluster = unique_cluster("repeat");
    let now = Utc::now();

    let mut stat = sample_stat("w1");
    store
        .upsert_stat(&cluster, "w1", &stat, now - ChronoDuration::minutes(20))
        .await
        .unwrap();
    assert!(!store.has_recent_stat(&cluster, "w1", 10).await.unwrap());

    stat.replicas = 3;
    store
        .upsert_stat(&cluster, "w1", &stat, now - ChronoDuration::minutes(5))
        .await
        .unwrap();

    assert_eq!(
        store.get_stat_count_for_workload(&cluster, "w1").await.unwrap(),
        1
    );
    assert!(store.has_recent_stat(&cluster, "w1", 10).await.unwrap());
    assert_eq!(
        store
            .get_stat_for_workload(&cluster, "w1")
            .await
            .unwrap()
            .replicas,
        3
    );
}

async fn recent_stat_window(store: &dyn Database) {
    let cluster = unique_cluster("recent");
    let now = Utc::now();

    store
        .upsert_stat(&cluster, "old", &sample_stat("old"), now - ChronoDuration::minutes(20))
        .await
        .unwrap();
    store
        .upsert_stat(&cluster, "fresh", &sample_stat("fresh"), now - ChronoDuration::minutes(5))
        .await
        .unwrap();

    assert!(!store.has_recent_stat(&cluster, "old", 10).await.unwrap());
    assert!(store.has_recent_stat(&cluster, "fresh", 10).await.unwrap());
    assert!(!store.has_recent_stat(&cluster, "missing", 10).await.unwrap());
}

async fn read_reports_physical_write_time(store: &dyn Database) {
    let cluster = unique_cluster("write-time");

    let mut stat = sample_stat("w1");
    stat.updated_at = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
    let generated_at = Utc::now() - ChronoDuration::hours(3);

    let before = Utc::now() - ChronoDuration::seconds(1);
    store
        .upsert_stat(&cluster, "w1", &stat, generated_at)
        .await
        .unwrap();
    let after = Utc::now() + ChronoDuration::seconds(1);

    let read = store.get_stat_for_workload(&cluster, "w1").await.unwrap();
    assert!(read.updated_at > before && read.updated_at < after);
    assert!(read.updated_at > generated_at);
}

async fn delete_workload(store: &dyn Database) {
    let cluster = unique_cluster("delete");

    let err = store
        .delete_stat_for_workload(&cluster, "w1")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    for workload in ["w1", "w2"] {
        store
            .upsert_stat(&cluster, workload, &sample_stat(workload), Utc::now())
            .await
            .unwrap();
    }
    assert_eq!(store.get_stat_count_for_cluster(&cluster).await.unwrap(), 2);

    store.delete_stat_for_workload(&cluster, "w1").await.unwrap();

    assert!(!store.has_stat_for_workload(&cluster, "w1").await.unwrap());
    assert!(store.has_stat_for_workload(&cluster, "w2").await.unwrap());
    assert_eq!(store.get_stat_count_for_cluster(&cluster).await.unwrap(), 1);

    let err = store
        .get_stat_for_workload(&cluster, "w1")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

async fn single_workload_lifecycle(store: &dyn Database) {
    let cluster = unique_cluster("c1");

    store
        .upsert_stat(&cluster, "w1", &sample_stat("w1"), Utc::now())
        .await
        .unwrap();
    assert_eq!(store.get_stat_count_for_cluster(&cluster).await.unwrap(), 1);

    store.delete_stat_for_workload(&cluster, "w1").await.unwrap();
    assert_eq!(store.get_stat_count_for_cluster(&cluster).await.unwrap(), 0);
    assert!(!store.has_stat_for_cluster(&cluster).await.unwrap());
}

async fn overrides_require_existing_row(store: &dyn Database) {
    let cluster = unique_cluster("overrides-missing");
    let overrides = Overrides {
        eviction_ranking: Some(EvictionRanking::Disabled),
        enabled: Some(false),
    };

    let err = store
        .update_stat_overrides_for_workload(&cluster, "w1", &overrides)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        store.get_stat_count_for_workload(&cluster, "w1").await.unwrap(),
        0
    );

    let err = store
        .get_stat_overrides_for_workload(&cluster, "w1")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

async fn overrides_default_and_survive_upsert(store: &dyn Database) {
    let cluster = unique_cluster("overrides");

    store
        .upsert_stat(&cluster, "w1", &sample_stat("w1"), Utc::now())
        .await
        .unwrap();
    assert_eq!(
        store
            .get_stat_overrides_for_workload(&cluster, "w1")
            .await
            .unwrap(),
        Overrides::default()
    );

    let overrides = Overrides {
        eviction_ranking: Some(EvictionRanking::High),
        enabled: None,
    };
    store
        .update_stat_overrides_for_workload(&cluster, "w1", &overrides)
        .await
        .unwrap();

    store
        .upsert_stat(&cluster, "w1", &sample_stat("w1"), Utc::now())
        .await
        .unwrap();

    assert_eq!(
        store
            .get_stat_overrides_for_workload(&cluster, "w1")
            .await
            .unwrap(),
        overrides
    );
}

async fn cluster_listing_order(store: &dyn Database) {
    let cluster = unique_cluster("order");

    store
        .upsert_stat(&cluster, "w1", &sample_stat("w1"), Utc::now())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    store
        .upsert_stat(&cluster, "w2", &sample_stat("w2"), Utc::now())
        .await
        .unwrap();

    let ids: Vec<String> = store
        .get_stats_for_cluster(&cluster)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.workload_identifier)
        .collect();
    assert_eq!(ids, vec!["w2", "w1"]);

    tokio::time::sleep(Duration::from_millis(10)).await;
    store
        .upsert_stat(&cluster, "w1", &sample_stat("w1"), Utc::now())
        .await
        .unwrap();

    let ids: Vec<String> = store
        .get_stats_for_cluster(&cluster)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.workload_identifier)
        .collect();
    assert_eq!(ids, vec!["w1", "w2"]);
}

async fn clusters_are_isolated(store: &dyn Database) {
    let cluster_a = unique_cluster("tenant-a");
    let cluster_b = unique_cluster("tenant-b");

    for cluster in [&cluster_a, &cluster_b] {
        store
            .upsert_stat(cluster, "shared", &sample_stat("shared"), Utc::now())
            .await
            .unwrap();
    }

    assert_eq!(store.delete_stats_for_cluster(&cluster_a).await.unwrap(), 1);
    assert!(!store.has_stat_for_cluster(&cluster_a).await.unwrap());
    assert!(store.has_stat_for_workload(&cluster_b, "shared").await.unwrap());

    // Nothing left to delete is still a success
    assert_eq!(store.delete_stats_for_cluster(&cluster_a).await.unwrap(), 0);
}

async fn oom_events_append_and_expire(store: &dyn Database) {
    let cluster = unique_cluster("oom");
    let other = unique_cluster("oom-other");

    let old = oom_event(&cluster, "ctr-1", ChronoDuration::days(10), 100);
    let recent_a = oom_event(&cluster, "ctr-1", ChronoDuration::hours(1), 200);
    let recent_b = oom_event(&cluster, "ctr-1", ChronoDuration::minutes(1), 300);
    let foreign = oom_event(&other, "ctr-9", ChronoDuration::days(10), 400);

    let mut ids = Vec::new();
    for event in [&old, &recent_a, &recent_b, &foreign] {
        ids.push(store.insert_oom_event(event).await.unwrap());
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let events = store.list_oom_events(&cluster).await.unwrap();
    let memories: Vec<u64> = events.iter().map(|e| e.memory_bytes).collect();
    assert_eq!(memories, vec![100, 200, 300]);
    assert!(events.iter().all(|e| e.container_id == "ctr-1"));

    assert_eq!(store.delete_old_oom_events(&cluster, 7).await.unwrap(), 1);

    let memories: Vec<u64> = store
        .list_oom_events(&cluster)
        .await
        .unwrap()
        .iter()
        .map(|e| e.memory_bytes)
        .collect();
    assert_eq!(memories, vec![200, 300]);

    // Other clusters keep their history
    assert_eq!(store.list_oom_events(&other).await.unwrap().len(), 1);
}

async fn run_all(store: &dyn Database) {
    upsert_then_read(store).await;
    repeated_upsert_updates_in_place(store).await;
    recent_stat_window(store).await;
    read_reports_physical_write_time(store).await;
    delete_workload(store).await;
    single_workload_lifecycle(store).await;
    overrides_require_existing_row(store).await;
    overrides_default_and_survive_upsert(store).await;
    cluster_listing_order(store).await;
    clusters_are_isolated(store).await;
    oom_events_append_and_expire(store).await;
}

async fn memory_store() -> SqliteStore {
    SqliteStore::in_memory().await.unwrap()
}

#[tokio::test]
async fn test_sqlite_upsert_then_read() {
    upsert_then_read(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_repeated_upsert_updates_in_place() {
    repeated_upsert_updates_in_place(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_recent_stat_window() {
    recent_stat_window(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_read_reports_physical_write_time() {
    read_reports_physical_write_time(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_delete_workload() {
    delete_workload(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_single_workload_lifecycle() {
    single_workload_lifecycle(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_overrides_require_existing_row() {
    overrides_require_existing_row(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_overrides_default_and_survive_upsert() {
    overrides_default_and_survive_upsert(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_cluster_listing_order() {
    cluster_listing_order(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_clusters_are_isolated() {
    clusters_are_isolated(&memory_store().await).await;
}

#[tokio::test]
async fn test_sqlite_oom_events_append_and_expire() {
    oom_events_append_and_expire(&memory_store().await).await;
}

#[tokio::test]
async fn test_concurrent_upserts_keep_one_row() {
    let store = std::sync::Arc::new(memory_store().await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut stat = sample_stat("w1");
            stat.replicas = i;
            store.upsert_stat("c1", "w1", &stat, Utc::now()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.get_stat_count_for_workload("c1", "w1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_connect_in_memory_from_config() {
    let store = connect(&DatabaseConfig::sqlite(":memory:")).await.unwrap();
    assert_eq!(store.engine(), DatabaseEngine::Sqlite);
    run_all(store.as_ref()).await;
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_file_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("cruise.db");
    let config = DatabaseConfig::sqlite(path.to_string_lossy());

    let store = connect(&config).await.unwrap();
    store
        .upsert_stat("c1", "w1", &sample_stat("w1"), Utc::now())
        .await
        .unwrap();
    store.close().await;

    let reopened = connect(&config).await.unwrap();
    assert!(reopened.has_stat_for_workload("c1", "w1").await.unwrap());
    reopened.close().await;
}

#[tokio::test]
async fn test_connect_rejects_invalid_config() {
    let mut config = DatabaseConfig::sqlite(":memory:");
    config.max_connections = 0;

    let result = connect(&config).await;
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[tokio::test]
async fn test_postgres_scenarios() {
    let Ok(url) = std::env::var("CRUISE_TEST_POSTGRES_URL") else {
        return;
    };

    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    let store = PostgresStore::from_pool(pool).await.unwrap();
    assert_eq!(store.engine(), DatabaseEngine::Postgres);

    run_all(&store).await;
    store.close().await;
}
