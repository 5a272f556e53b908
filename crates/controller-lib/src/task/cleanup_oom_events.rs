//! OOM event retention

use super::Task;
use crate::config::{CleanupOomEventsMetadata, TaskConfig};
use crate::context::TaskContext;
use crate::observability::StructuredLogger;
use crate::store::OomEventStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{warn, Instrument};

/// Deletes a cluster's OOM events older than the configured retention
pub struct CleanupOomEventsTask<S: OomEventStore + ?Sized> {
    name: String,
    cluster_id: String,
    config: TaskConfig<CleanupOomEventsMetadata>,
    store: Arc<S>,
    logger: StructuredLogger,
}

impl<S: OomEventStore + ?Sized> CleanupOomEventsTask<S> {
    pub fn new(
        name: impl Into<String>,
        cluster_id: impl Into<String>,
        config: TaskConfig<CleanupOomEventsMetadata>,
        store: Arc<S>,
    ) -> Self {
        let name = name.into();
        let cluster_id = cluster_id.into();

        if config.metadata.retention_days == 0 {
            warn!(
                task = %name,
                retention_days = config.metadata.effective_retention_days(),
                "retention_days is 0, using default"
            );
        }

        Self {
            logger: StructuredLogger::new(cluster_id.clone()),
            name,
            cluster_id,
            config,
            store,
        }
    }

    pub fn retention_days(&self) -> u32 {
        self.config.metadata.effective_retention_days()
    }
}

#[async_trait]
impl<S: OomEventStore + ?Sized> Task for CleanupOomEventsTask<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> &str {
        &self.config.schedule
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn run(&self, ctx: TaskContext) -> Result<()> {
        let ctx = ctx
            .with_task(self.name.as_str())
            .with_cluster(self.cluster_id.as_str());
        let retention_days = self.retention_days();

        async {
            let deleted = self
                .store
                .delete_old_oom_events(&self.cluster_id, retention_days)
                .await
                .context("failed to cleanup old OOM events")?;

            self.logger.log_oom_cleanup(deleted, retention_days);
            Ok::<_, anyhow::Error>(())
        }
        .instrument(ctx.span())
        .await
    }
}
