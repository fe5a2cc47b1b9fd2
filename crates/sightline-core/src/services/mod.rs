//! Collaborator capabilities.
//!
//! The remote vendor clients (recognition, object storage, work queue,
//! document repository) are consumed behind narrow async traits injected
//! into each component: binaries wire the HTTP implementations, tests
//! substitute the in-memory ones.

mod http;
mod memory;

pub use http::{HttpDocumentService, HttpObjectStore, HttpRecognitionClient, HttpWorkQueue};
pub use memory::{MemoryDocumentService, MemoryObjectStore, MemoryRecognition, MemoryWorkQueue};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocumentInfo, FaceRegion, IdentityMatch, ModelStatus};

/// Remote face detection, identity search, and model lifecycle operations.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Detect face regions in an encoded image, requesting full attribute
    /// detail. Zero regions is a valid result.
    async fn detect_faces(&self, image: &[u8]) -> Result<Vec<FaceRegion>>;

    /// Search the identity collection for the face in `image`, returning at
    /// most `max_results` candidates at strictly-above-`threshold` confidence.
    /// The threshold is enforced by the service; callers must not relax it.
    async fn search_by_image(
        &self,
        collection_id: &str,
        image: &[u8],
        max_results: u32,
        threshold: f32,
    ) -> Result<Vec<IdentityMatch>>;

    async fn start_model(&self, model_id: &str) -> Result<()>;

    async fn stop_model(&self, model_id: &str) -> Result<()>;

    async fn describe_model(&self, model_id: &str) -> Result<ModelStatus>;
}

/// Object storage holding the image binaries under `<prefix><digest>` keys.
/// Tags are the side-channel used for the batch idempotency marker.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    async fn get_tag(&self, bucket: &str, key: &str, name: &str) -> Result<Option<String>>;

    async fn put_tag(&self, bucket: &str, key: &str, name: &str, value: &str) -> Result<()>;
}

/// A received queue message: the payload plus the delivery token required to
/// delete it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// At-least-once work queue with no ordering guarantee. Delivery exclusivity
/// during the visibility window is the queue's responsibility, not the
/// caller's.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn send(&self, body: &str) -> Result<()>;

    /// Long-poll for up to `max_messages`, waiting at most `wait` when the
    /// queue is empty.
    async fn receive(&self, max_messages: u32, wait: Duration) -> Result<Vec<QueueMessage>>;

    async fn delete(&self, receipt_handle: &str) -> Result<()>;
}

/// Document repository: metadata reads plus the transactional-per-document
/// identities write.
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn fetch(&self, doc_id: &str) -> Result<DocumentInfo>;

    async fn list_collection(&self, collection_id: &str) -> Result<Vec<DocumentInfo>>;

    /// Replace the document's recognized-identities field wholesale and save
    /// within the repository's per-document transaction.
    async fn save_identities(&self, doc_id: &str, identities: &[String]) -> Result<()>;

    /// Operator notification that a batch run finished.
    async fn send_completion_notice(&self, recipient: &str, collection_id: &str) -> Result<()>;
}
