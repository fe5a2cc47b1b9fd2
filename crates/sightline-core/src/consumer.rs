//! Long-poll consumer for the batch work queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::pipeline::ImagePipeline;
use crate::producer::MARKER_PROCESSED;
use crate::services::{ObjectStore, QueueMessage, WorkQueue};
use crate::types::WorkItem;

/// How long a consumer run keeps polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Poll until the shutdown signal fires.
    Forever,
    /// Exit after this many consecutive empty receives.
    Drain { empty_polls: u32 },
}

/// Counters for one consumer run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub succeeded: u64,
    pub skipped: u64,
    pub retried: u64,
    pub malformed: u64,
}

/// Polls the queue and runs the full pipeline for each delivered item.
///
/// An item is deleted only on a terminal disposition: a completed write, or
/// an input defect that redelivery cannot fix. Transient failures leave the
/// item inside its visibility window for the queue to redeliver; duplicate
/// delivery is safe because the result write replaces wholesale. Several
/// consumers may poll the same queue; delivery exclusivity is the queue's
/// job, not application locking.
pub struct BatchConsumer {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn ObjectStore>,
    pipeline: ImagePipeline,
    marker_tag: String,
    poll_wait: Duration,
    receive_batch_size: u32,
}

impl BatchConsumer {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn ObjectStore>,
        pipeline: ImagePipeline,
        marker_tag: &str,
        poll_wait: Duration,
        receive_batch_size: u32,
    ) -> Self {
        Self {
            queue,
            store,
            pipeline,
            marker_tag: marker_tag.to_string(),
            poll_wait,
            receive_batch_size,
        }
    }

    /// Run the consumer loop until the mode or the shutdown signal ends it.
    ///
    /// The shutdown signal stops polling; messages already received keep
    /// processing so each ends up either deleted or redelivered whole.
    pub async fn run(&self, mode: RunMode, shutdown: watch::Receiver<bool>) -> ConsumerStats {
        let mut shutdown = shutdown;
        let mut stats = ConsumerStats::default();
        let mut empty_receives = 0u32;

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, consumer loop exiting");
                break;
            }

            let received = tokio::select! {
                result = self.queue.receive(self.receive_batch_size, self.poll_wait) => result,
                _ = shutdown.changed() => continue,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(error = %e, "queue receive failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if messages.is_empty() {
                empty_receives += 1;
                if let RunMode::Drain { empty_polls } = mode {
                    if empty_receives >= empty_polls {
                        info!(empty_receives, "queue drained, consumer exiting");
                        break;
                    }
                }
                continue;
            }
            empty_receives = 0;

            for message in messages {
                self.handle_message(message, &mut stats).await;
            }
        }

        info!(?stats, "consumer run finished");
        stats
    }

    async fn handle_message(&self, message: QueueMessage, stats: &mut ConsumerStats) {
        let item = match WorkItem::from_json(&message.body) {
            Ok(item) => item,
            Err(e) => {
                // redelivering an undecodable payload can never succeed
                warn!(error = %e, "undeliverable work item payload, removing from queue");
                self.delete(&message).await;
                stats.malformed += 1;
                return;
            }
        };

        info!(doc_id = %item.doc_id, key = %item.key, "processing work item");
        match self.pipeline.process(&item.doc_id).await {
            Ok(outcome) => {
                info!(doc_id = %item.doc_id, %outcome, "work item processed");
                self.mark_processed(&item).await;
                self.delete(&message).await;
                stats.succeeded += 1;
            }
            Err(e) if e.is_transient() => {
                warn!(doc_id = %item.doc_id, error = %e, "transient failure, leaving item for redelivery");
                stats.retried += 1;
            }
            Err(e) => {
                warn!(doc_id = %item.doc_id, error = %e, "item not processable, removing from queue");
                self.delete(&message).await;
                stats.skipped += 1;
            }
        }
    }

    async fn mark_processed(&self, item: &WorkItem) {
        if let Err(e) = self
            .store
            .put_tag(&item.bucket, &item.key, &self.marker_tag, MARKER_PROCESSED)
            .await
        {
            warn!(key = %item.key, error = %e, "failed to update processed marker");
        }
    }

    async fn delete(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.delete(&message.receipt_handle).await {
            warn!(error = %e, "queue delete failed, item will be redelivered");
        }
    }
}
