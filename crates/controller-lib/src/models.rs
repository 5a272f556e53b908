//! Core data models for the controller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How aggressively a workload's pods may be evicted for rightsizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionRanking {
    Disabled,
    Low,
    #[default]
    Medium,
    High,
}

/// Whether a container is a regular or an init container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    #[default]
    Container,
    InitContainer,
}

/// Percentile summary for a single resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileStats {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub max: f64,
}

/// Seven-day usage summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SevenDayStats {
    pub median: f64,
    pub p90: f64,
    pub max: f64,
}

/// Per-container usage statistics computed by the metric source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub container_name: String,
    pub container_type: ContainerType,
    pub cpu: PercentileStats,
    pub memory: PercentileStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psi_adjusted_cpu: Option<PercentileStats>,
    #[serde(default)]
    pub oom_memory: f64,
    #[serde(default)]
    pub cpu_7_day: SevenDayStats,
    #[serde(default)]
    pub memory_7_day: SevenDayStats,
}

/// Container requests and limits as they were before any optimization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginalContainerResources {
    pub name: String,
    pub cpu_request: f64,
    pub cpu_limit: f64,
    pub memory_request: f64,
    pub memory_limit: f64,
}

/// Resource statistics for one workload in one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStat {
    pub workload_identifier: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub creation_time: DateTime<Utc>,
    /// Physical write time when read back from the store
    pub updated_at: DateTime<Utc>,
    pub replicas: i32,
    pub eviction_ranking: EvictionRanking,
    #[serde(default)]
    pub container_stats: Vec<ContainerStats>,
    #[serde(default)]
    pub original_container_resources: Vec<OriginalContainerResources>,
}

/// Operator-supplied corrections layered on top of a workload's recommendation.
///
/// Unset fields are omitted, so a fresh row's `{}` decodes to the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_ranking: Option<EvictionRanking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// A single OOM kill notification emitted by the observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OomInfo {
    pub container_id: String,
    pub timestamp: DateTime<Utc>,
    pub memory_bytes: u64,
}

/// Persisted OOM kill record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OomEvent {
    /// Assigned by the store; zero until persisted
    pub id: i64,
    pub cluster_id: String,
    pub container_id: String,
    pub timestamp: DateTime<Utc>,
    pub memory_bytes: u64,
}

impl OomEvent {
    /// Build an unsaved event for `cluster_id` from an observer notification
    pub fn from_info(cluster_id: impl Into<String>, info: OomInfo) -> Self {
        Self {
            id: 0,
            cluster_id: cluster_id.into(),
            container_id: info.container_id,
            timestamp: info.timestamp,
            memory_bytes: info.memory_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_overrides_decode_to_default() {
        let overrides: Overrides = serde_json::from_str("{}").unwrap();
        assert_eq!(overrides, Overrides::default());
        assert_eq!(serde_json::to_string(&overrides).unwrap(), "{}");
    }

    #[test]
    fn test_eviction_ranking_wire_format() {
        let json = serde_json::to_string(&EvictionRanking::Disabled).unwrap();
        assert_eq!(json, "\"disabled\"");

        let ranking: EvictionRanking = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(ranking, EvictionRanking::High);
    }

    #[test]
    fn test_oom_event_from_info() {
        let now = Utc::now();
        let event = OomEvent::from_info(
            "c1",
            OomInfo {
                container_id: "abc".to_string(),
                timestamp: now,
                memory_bytes: 1024,
            },
        );

        assert_eq!(event.id, 0);
        assert_eq!(event.cluster_id, "c1");
        assert_eq!(event.container_id, "abc");
        assert_eq!(event.timestamp, now);
        assert_eq!(event.memory_bytes, 1024);
    }
}
