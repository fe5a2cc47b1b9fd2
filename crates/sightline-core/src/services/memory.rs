//! In-memory implementations of the collaborator capabilities.
//!
//! Deterministic substitutes for the remote services, used by unit and
//! integration tests. Call counters are exposed so tests can assert on
//! delivery semantics (exactly-one delete, exactly-one stop, ...).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DocumentService, ObjectStore, QueueMessage, RecognitionService, WorkQueue};
use crate::error::{PipelineError, Result};
use crate::types::{DocumentInfo, FaceRegion, IdentityMatch, ModelStatus};

// =============================================================================
// Recognition
// =============================================================================

/// Canned recognition service: fixed face regions per detect call and an
/// identity index that enforces the search threshold the way the real
/// service does (server-side, strictly above).
#[derive(Default)]
pub struct MemoryRecognition {
    faces: Mutex<Vec<FaceRegion>>,
    index: Mutex<Vec<IdentityMatch>>,
    status: Mutex<Option<ModelStatus>>,
    /// When set, `start_model` leaves the model stuck in STARTING.
    stuck_starting: AtomicBool,
    /// When set, every search fails with a transient error.
    fail_searches: AtomicBool,
    /// When set, every detect fails with a transient error.
    fail_detects: AtomicBool,
    detect_calls: AtomicU32,
    search_calls: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
}

impl MemoryRecognition {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_faces(&self, faces: Vec<FaceRegion>) {
        *self.faces.lock().await = faces;
    }

    /// Register an identity candidate with its index-side confidence.
    pub async fn index_identity(&self, identity_id: &str, confidence: f32) {
        self.index.lock().await.push(IdentityMatch {
            identity_id: identity_id.to_string(),
            confidence,
        });
    }

    pub async fn set_status(&self, status: ModelStatus) {
        *self.status.lock().await = Some(status);
    }

    pub fn set_stuck_starting(&self, stuck: bool) {
        self.stuck_starting.store(stuck, Ordering::SeqCst);
    }

    pub fn set_fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_detects(&self, fail: bool) {
        self.fail_detects.store(fail, Ordering::SeqCst);
    }

    pub fn detect_call_count(&self) -> u32 {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn search_call_count(&self) -> u32 {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn start_call_count(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_call_count(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionService for MemoryRecognition {
    async fn detect_faces(&self, _image: &[u8]) -> Result<Vec<FaceRegion>> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_detects.load(Ordering::SeqCst) {
            return Err(PipelineError::Recognition("detect unavailable".into()));
        }
        Ok(self.faces.lock().await.clone())
    }

    async fn search_by_image(
        &self,
        _collection_id: &str,
        _image: &[u8],
        max_results: u32,
        threshold: f32,
    ) -> Result<Vec<IdentityMatch>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(PipelineError::Recognition("search unavailable".into()));
        }
        let mut candidates = self.index.lock().await.clone();
        candidates.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(candidates
            .into_iter()
            .filter(|m| m.confidence > threshold)
            .take(max_results as usize)
            .collect())
    }

    async fn start_model(&self, _model_id: &str) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let next = if self.stuck_starting.load(Ordering::SeqCst) {
            ModelStatus::Starting
        } else {
            ModelStatus::Running
        };
        *self.status.lock().await = Some(next);
        Ok(())
    }

    async fn stop_model(&self, _model_id: &str) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().await = Some(ModelStatus::Stopped);
        Ok(())
    }

    async fn describe_model(&self, _model_id: &str) -> Result<ModelStatus> {
        Ok(self.status.lock().await.clone().unwrap_or(ModelStatus::Stopped))
    }
}

// =============================================================================
// Object storage
// =============================================================================

/// Objects and tags held in maps keyed by (bucket, key).
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    tags: Mutex<HashMap<(String, String, String), String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
    }

    pub async fn tag_value(&self, bucket: &str, key: &str, name: &str) -> Option<String> {
        self.tags
            .lock()
            .await
            .get(&(bucket.to_string(), key.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| PipelineError::Storage(format!("no such object {bucket}/{key}")))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .await
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_tag(&self, bucket: &str, key: &str, name: &str) -> Result<Option<String>> {
        Ok(self.tag_value(bucket, key, name).await)
    }

    async fn put_tag(&self, bucket: &str, key: &str, name: &str, value: &str) -> Result<()> {
        self.tags.lock().await.insert(
            (bucket.to_string(), key.to_string(), name.to_string()),
            value.to_string(),
        );
        Ok(())
    }
}

// =============================================================================
// Work queue
// =============================================================================

struct StoredMessage {
    body: String,
    receipt_handle: String,
    visible: bool,
}

/// Queue with at-least-once semantics: received messages turn invisible for
/// the rest of the test, deletes remove them, and [`release_invisible`]
/// simulates a visibility-window expiry. The long-poll wait is not simulated.
///
/// [`release_invisible`]: MemoryWorkQueue::release_invisible
#[derive(Default)]
pub struct MemoryWorkQueue {
    messages: Mutex<Vec<StoredMessage>>,
    send_calls: AtomicU32,
    delete_calls: AtomicU32,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_call_count(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn delete_call_count(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Messages not yet deleted, visible or not.
    pub async fn remaining(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// Make every in-flight message deliverable again.
    pub async fn release_invisible(&self) {
        for message in self.messages.lock().await.iter_mut() {
            message.visible = true;
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn send(&self, body: &str) -> Result<()> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().await.push(StoredMessage {
            body: body.to_string(),
            receipt_handle: Uuid::new_v4().to_string(),
            visible: true,
        });
        Ok(())
    }

    async fn receive(&self, max_messages: u32, _wait: Duration) -> Result<Vec<QueueMessage>> {
        let mut messages = self.messages.lock().await;
        let mut delivered = Vec::new();
        for message in messages.iter_mut() {
            if delivered.len() >= max_messages as usize {
                break;
            }
            if message.visible {
                message.visible = false;
                delivered.push(QueueMessage {
                    body: message.body.clone(),
                    receipt_handle: message.receipt_handle.clone(),
                });
            }
        }
        Ok(delivered)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.messages
            .lock()
            .await
            .retain(|m| m.receipt_handle != receipt_handle);
        Ok(())
    }
}

// =============================================================================
// Document repository
// =============================================================================

/// Document store recording every identities write.
#[derive(Default)]
pub struct MemoryDocumentService {
    documents: Mutex<HashMap<String, DocumentInfo>>,
    collections: Mutex<HashMap<String, Vec<String>>>,
    saved: Mutex<HashMap<String, Vec<String>>>,
    notices: Mutex<Vec<String>>,
    fail_saves: AtomicBool,
    save_calls: AtomicU32,
}

impl MemoryDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_document(&self, document: DocumentInfo) {
        self.documents
            .lock()
            .await
            .insert(document.id.clone(), document);
    }

    pub async fn add_to_collection(&self, collection_id: &str, doc_id: &str) {
        self.collections
            .lock()
            .await
            .entry(collection_id.to_string())
            .or_default()
            .push(doc_id.to_string());
    }

    pub async fn saved_identities(&self, doc_id: &str) -> Option<Vec<String>> {
        self.saved.lock().await.get(doc_id).cloned()
    }

    pub async fn notices(&self) -> Vec<String> {
        self.notices.lock().await.clone()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_call_count(&self) -> u32 {
        self.save_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentService for MemoryDocumentService {
    async fn fetch(&self, doc_id: &str) -> Result<DocumentInfo> {
        self.documents
            .lock()
            .await
            .get(doc_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(doc_id.to_string()))
    }

    async fn list_collection(&self, collection_id: &str) -> Result<Vec<DocumentInfo>> {
        let ids = self
            .collections
            .lock()
            .await
            .get(collection_id)
            .cloned()
            .unwrap_or_default();
        let documents = self.documents.lock().await;
        Ok(ids.iter().filter_map(|id| documents.get(id).cloned()).collect())
    }

    async fn save_identities(&self, doc_id: &str, identities: &[String]) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PipelineError::Persistence("save rejected".into()));
        }
        self.saved
            .lock()
            .await
            .insert(doc_id.to_string(), identities.to_vec());
        Ok(())
    }

    async fn send_completion_notice(&self, recipient: &str, _collection_id: &str) -> Result<()> {
        self.notices.lock().await.push(recipient.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_enforces_threshold_server_side() {
        let recognition = MemoryRecognition::new();
        recognition.index_identity("person-1", 75.0).await;

        let below = recognition.search_by_image("c", b"img", 1, 80.0).await.unwrap();
        assert!(below.is_empty());

        let at = recognition.search_by_image("c", b"img", 1, 75.0).await.unwrap();
        assert!(at.is_empty(), "a candidate at the threshold is rejected");

        let above = recognition.search_by_image("c", b"img", 1, 70.0).await.unwrap();
        assert_eq!(above.len(), 1);
        assert_eq!(above[0].identity_id, "person-1");
    }

    #[tokio::test]
    async fn test_search_returns_top_candidate_only() {
        let recognition = MemoryRecognition::new();
        recognition.index_identity("weak", 85.0).await;
        recognition.index_identity("strong", 95.0).await;

        let found = recognition.search_by_image("c", b"img", 1, 80.0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identity_id, "strong");
    }

    #[tokio::test]
    async fn test_queue_visibility_and_delete() {
        let queue = MemoryWorkQueue::new();
        queue.send("a").await.unwrap();
        queue.send("b").await.unwrap();

        let first = queue.receive(10, Duration::from_secs(0)).await.unwrap();
        assert_eq!(first.len(), 2);

        // in flight: nothing deliverable until the window expires
        let second = queue.receive(10, Duration::from_secs(0)).await.unwrap();
        assert!(second.is_empty());

        queue.delete(&first[0].receipt_handle).await.unwrap();
        assert_eq!(queue.remaining().await, 1);

        queue.release_invisible().await;
        let redelivered = queue.receive(10, Duration::from_secs(0)).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].body, "b");
    }

    #[tokio::test]
    async fn test_store_list_filters_by_prefix() {
        let store = MemoryObjectStore::new();
        store.put("assets", "binaries/aaa", vec![1]).await;
        store.put("assets", "binaries/bbb", vec![2]).await;
        store.put("assets", "other/ccc", vec![3]).await;

        let keys = store.list("assets", "binaries/").await.unwrap();
        assert_eq!(keys, vec!["binaries/aaa".to_string(), "binaries/bbb".to_string()]);
    }

    #[tokio::test]
    async fn test_document_save_replaces_wholesale() {
        let documents = MemoryDocumentService::new();
        documents.save_identities("doc-1", &["a".into(), "b".into()]).await.unwrap();
        documents.save_identities("doc-1", &["c".into()]).await.unwrap();
        assert_eq!(documents.saved_identities("doc-1").await.unwrap(), vec!["c".to_string()]);
    }
}
