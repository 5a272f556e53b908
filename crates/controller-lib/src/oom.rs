//! OOM event pipeline
//!
//! The [`OomObserver`] owns a bounded notification stream. Whatever watches
//! the node for OOM kills pushes into it through cloneable [`OomReporter`]s.
//! An [`OomProcessor`] drains the stream and persists one row per
//! notification, in arrival order.
//!
//! Notifications are best-effort: a full stream drops the newest one and a
//! failed insert drops the event. Both losses are logged and counted.

use crate::context::TaskContext;
use crate::models::{OomEvent, OomInfo};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::store::OomEventStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Owner of the OOM notification stream
pub struct OomObserver {
    tx: mpsc::Sender<OomInfo>,
    rx: mpsc::Receiver<OomInfo>,
}

impl OomObserver {
    /// Create a stream buffering at most `capacity` notifications
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx }
    }

    /// Handle for pushing notifications. The stream closes once the
    /// observer has been handed to a processor and every reporter is dropped.
    pub fn reporter(&self) -> OomReporter {
        OomReporter {
            tx: self.tx.clone(),
            metrics: ControllerMetrics::new(),
        }
    }

    fn into_stream(self) -> mpsc::Receiver<OomInfo> {
        self.rx
    }
}

/// Non-blocking producer side of the stream
#[derive(Clone)]
pub struct OomReporter {
    tx: mpsc::Sender<OomInfo>,
    metrics: ControllerMetrics,
}

impl OomReporter {
    /// Queue a notification. Returns false if it was dropped.
    pub fn report(&self, info: OomInfo) -> bool {
        match self.tx.try_send(info) {
            Ok(()) => true,
            Err(TrySendError::Full(info)) => {
                warn!(
                    container_id = %info.container_id,
                    memory_bytes = info.memory_bytes,
                    "OOM notification stream full, dropping notification"
                );
                self.metrics.inc_oom_notifications_dropped();
                false
            }
            Err(TrySendError::Closed(info)) => {
                debug!(
                    container_id = %info.container_id,
                    "OOM notification stream closed"
                );
                false
            }
        }
    }
}

/// Persists OOM notifications for one cluster
pub struct OomProcessor<S: OomEventStore + ?Sized> {
    store: Arc<S>,
    cluster_id: String,
    stop: CancellationToken,
}

impl<S: OomEventStore + ?Sized + 'static> OomProcessor<S> {
    pub fn new(store: Arc<S>, cluster_id: impl Into<String>) -> Self {
        Self {
            store,
            cluster_id: cluster_id.into(),
            stop: CancellationToken::new(),
        }
    }

    /// Spawn the consumer loop over `observer`'s stream.
    ///
    /// The loop ends when `ctx` is cancelled, when [`stop`](Self::stop) is
    /// called, or when the stream closes.
    pub fn start(&self, ctx: CancellationToken, observer: OomObserver) -> JoinHandle<()> {
        let mut stream = observer.into_stream();
        let store = self.store.clone();
        let stop = self.stop.clone();
        let cluster_id = self.cluster_id.clone();
        let span = TaskContext::new().with_cluster(cluster_id.as_str()).span();

        let handle = tokio::spawn(
            async move {
                let logger = StructuredLogger::new(cluster_id.as_str());
                let metrics = ControllerMetrics::new();

                loop {
                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => {
                            info!("OOM processor stopped due to context cancellation");
                            break;
                        }
                        _ = stop.cancelled() => {
                            info!("OOM processor stopped");
                            break;
                        }
                        received = stream.recv() => {
                            let Some(info) = received else {
                                info!("OOM channel closed, stopping processor");
                                break;
                            };
                            persist(store.as_ref(), &cluster_id, info, &logger, &metrics).await;
                        }
                    }
                }
            }
            .instrument(span),
        );

        info!(cluster = %self.cluster_id, "OOM processor started");
        handle
    }

    /// Ask the consumer loop to exit. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

async fn persist<S: OomEventStore + ?Sized>(
    store: &S,
    cluster_id: &str,
    info: OomInfo,
    logger: &StructuredLogger,
    metrics: &ControllerMetrics,
) {
    let event = OomEvent::from_info(cluster_id, info);

    match store.insert_oom_event(&event).await {
        Ok(_) => {
            metrics.inc_oom_events_stored();
            logger.log_oom_stored(&event.container_id, event.memory_bytes);
        }
        Err(e) => {
            metrics.inc_oom_events_lost();
            logger.log_oom_lost(&event.container_id, &e);
        }
    }
}
