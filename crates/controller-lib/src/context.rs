//! Request-scoped attribution for logs and traces
//!
//! A `TaskContext` travels with every scheduled run and every OOM event so
//! that log lines can be attributed to a task, cluster, API, namespace or
//! query without threading each value through by hand.

use std::collections::BTreeMap;
use tracing::Span;

pub const TASK_KEY: &str = "task";
pub const CLUSTER_KEY: &str = "cluster";
pub const API_KEY: &str = "api";
pub const NAMESPACE_KEY: &str = "namespace";
pub const QUERY_ID_KEY: &str = "query";

/// Attribution carrier. Empty values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskContext {
    task: Option<String>,
    cluster: Option<String>,
    api: Option<String>,
    namespace: Option<String>,
    query_id: Option<String>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = non_empty(task.into());
        self
    }

    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster = non_empty(cluster_id.into());
        self
    }

    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = non_empty(api.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = non_empty(namespace.into());
        self
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = non_empty(query_id.into());
        self
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn api(&self) -> Option<&str> {
        self.api.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    /// Look up an attribute by its flat key name
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            TASK_KEY => self.task(),
            CLUSTER_KEY => self.cluster(),
            API_KEY => self.api(),
            NAMESPACE_KEY => self.namespace(),
            QUERY_ID_KEY => self.query_id(),
            _ => None,
        }
    }

    /// Flat map of every attribute that is set
    pub fn attributes(&self) -> BTreeMap<String, String> {
        [TASK_KEY, CLUSTER_KEY, API_KEY, NAMESPACE_KEY, QUERY_ID_KEY]
            .into_iter()
            .filter_map(|key| self.get(key).map(|v| (key.to_string(), v.to_string())))
            .collect()
    }

    /// Span carrying the attributes as structured fields
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "task_context",
            task = self.task(),
            cluster = self.cluster(),
            api = self.api(),
            namespace = self.namespace(),
            query = self.query_id(),
        )
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
