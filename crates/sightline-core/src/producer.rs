//! Enumerates unprocessed objects and feeds the work queue.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::services::{DocumentService, ObjectStore, WorkQueue};
use crate::types::{BlobRef, DocumentInfo, WorkItem};

/// Marker value set before an object is enqueued.
pub const MARKER_PENDING: &str = "pending";
/// Marker value set by the consumer after a successful write.
pub const MARKER_PROCESSED: &str = "processed";

/// Lists the source collection, derives `<prefix><digest>` storage keys, and
/// enqueues one work item per object that exists in storage and carries no
/// marker tag yet.
///
/// The marker is set *before* the enqueue: a rerun skips everything already
/// tagged, and a crash between tag and send leaves an object skipped (the
/// tag can be cleared to requeue it), never double-queued.
pub struct BatchProducer {
    documents: Arc<dyn DocumentService>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn WorkQueue>,
    bucket: String,
    key_prefix: String,
    source_collection: String,
    hires_rendition: String,
    marker_tag: String,
}

impl BatchProducer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<dyn DocumentService>,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn WorkQueue>,
        bucket: &str,
        key_prefix: &str,
        source_collection: &str,
        hires_rendition: &str,
        marker_tag: &str,
    ) -> Self {
        Self {
            documents,
            store,
            queue,
            bucket: bucket.to_string(),
            key_prefix: key_prefix.to_string(),
            source_collection: source_collection.to_string(),
            hires_rendition: hires_rendition.to_string(),
            marker_tag: marker_tag.to_string(),
        }
    }

    /// Returns the number of items enqueued. Safe to run repeatedly.
    pub async fn enumerate_and_enqueue(&self) -> Result<usize> {
        let documents = self.documents.list_collection(&self.source_collection).await?;
        let existing: HashSet<String> = self
            .store
            .list(&self.bucket, &self.key_prefix)
            .await?
            .into_iter()
            .collect();
        info!(
            collection = %self.source_collection,
            documents = documents.len(),
            objects = existing.len(),
            "batch enumeration started"
        );

        let mut enqueued = 0usize;
        for document in &documents {
            let Some(blob) = batch_blob(document, &self.hires_rendition) else {
                warn!(doc_id = %document.id, "document has no image content, skipping");
                continue;
            };
            let key = format!("{}{}", self.key_prefix, blob.digest);
            if !existing.contains(&key) {
                warn!(doc_id = %document.id, key = %key, "object missing from storage, skipping");
                continue;
            }
            if self
                .store
                .get_tag(&self.bucket, &key, &self.marker_tag)
                .await?
                .is_some()
            {
                debug!(key = %key, "already enqueued or processed, skipping");
                continue;
            }

            self.store
                .put_tag(&self.bucket, &key, &self.marker_tag, MARKER_PENDING)
                .await?;
            let item = WorkItem::new(&self.bucket, &key, &document.id);
            let body = item
                .to_json()
                .map_err(|e| PipelineError::Queue(format!("failed to encode work item: {e}")))?;
            self.queue.send(&body).await?;
            info!(doc_id = %document.id, key = %key, "work item enqueued");
            enqueued += 1;
        }

        info!(enqueued, "batch enumeration complete");
        Ok(enqueued)
    }
}

/// The batch path prefers the high-resolution rendition's digest when one
/// exists, falling back to the primary content.
fn batch_blob<'a>(document: &'a DocumentInfo, hires_rendition: &str) -> Option<&'a BlobRef> {
    document
        .renditions
        .iter()
        .find(|r| r.title == hires_rendition)
        .map(|r| &r.content)
        .or(document.content.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MemoryDocumentService, MemoryObjectStore, MemoryWorkQueue};
    use crate::types::{MediaType, Rendition};

    fn doc(id: &str, digest: &str) -> DocumentInfo {
        DocumentInfo {
            id: id.into(),
            content: Some(BlobRef { digest: digest.into(), media_type: MediaType::Jpeg }),
            renditions: vec![],
        }
    }

    async fn producer_with_one_doc(
    ) -> (BatchProducer, Arc<MemoryObjectStore>, Arc<MemoryWorkQueue>) {
        let documents = Arc::new(MemoryDocumentService::new());
        let store = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(MemoryWorkQueue::new());

        documents.insert_document(doc("doc-1", "abc")).await;
        documents.add_to_collection("inbox", "doc-1").await;
        store.put("assets", "binaries/abc", vec![1]).await;

        let producer = BatchProducer::new(
            documents,
            Arc::clone(&store) as _,
            Arc::clone(&queue) as _,
            "assets",
            "binaries/",
            "inbox",
            "FullHD",
            "recognition-state",
        );
        (producer, store, queue)
    }

    #[tokio::test]
    async fn test_enqueues_and_marks_pending() {
        let (producer, store, queue) = producer_with_one_doc().await;

        let enqueued = producer.enumerate_and_enqueue().await.unwrap();
        assert_eq!(enqueued, 1);
        assert_eq!(queue.send_call_count(), 1);
        assert_eq!(
            store.tag_value("assets", "binaries/abc", "recognition-state").await.as_deref(),
            Some(MARKER_PENDING)
        );
    }

    #[tokio::test]
    async fn test_second_run_enqueues_nothing() {
        let (producer, _store, queue) = producer_with_one_doc().await;

        assert_eq!(producer.enumerate_and_enqueue().await.unwrap(), 1);
        assert_eq!(producer.enumerate_and_enqueue().await.unwrap(), 0);
        assert_eq!(queue.send_call_count(), 1);
    }

    #[tokio::test]
    async fn test_skips_objects_missing_from_storage() {
        let documents = Arc::new(MemoryDocumentService::new());
        let store = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(MemoryWorkQueue::new());
        documents.insert_document(doc("doc-1", "not-uploaded")).await;
        documents.add_to_collection("inbox", "doc-1").await;

        let producer = BatchProducer::new(
            documents, store, Arc::clone(&queue) as _,
            "assets", "binaries/", "inbox", "FullHD", "recognition-state",
        );
        assert_eq!(producer.enumerate_and_enqueue().await.unwrap(), 0);
        assert_eq!(queue.send_call_count(), 0);
    }

    #[tokio::test]
    async fn test_prefers_hires_rendition_digest() {
        let documents = Arc::new(MemoryDocumentService::new());
        let store = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(MemoryWorkQueue::new());

        let mut document = doc("doc-1", "primary");
        document.renditions.push(Rendition {
            title: "FullHD".into(),
            content: BlobRef { digest: "hires".into(), media_type: MediaType::Jpeg },
        });
        documents.insert_document(document).await;
        documents.add_to_collection("inbox", "doc-1").await;
        store.put("assets", "binaries/hires", vec![1]).await;

        let producer = BatchProducer::new(
            documents, Arc::clone(&store) as _, Arc::clone(&queue) as _,
            "assets", "binaries/", "inbox", "FullHD", "recognition-state",
        );
        assert_eq!(producer.enumerate_and_enqueue().await.unwrap(), 1);
        assert!(store
            .tag_value("assets", "binaries/hires", "recognition-state")
            .await
            .is_some());
    }
}
