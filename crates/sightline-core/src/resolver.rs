//! Resolves a document reference to the best available image rendition.

use std::sync::Arc;

use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::services::{DocumentService, ObjectStore};
use crate::types::{BlobRef, DocumentInfo, ImageAsset};

/// Picks the blob to process for a document and fetches its bytes from the
/// object store under `<prefix><digest>`.
///
/// When the primary content's media type is outside the allowed set, the
/// named high-resolution rendition is substituted; when that rendition does
/// not exist the primary content is used unchanged, so decoding fails
/// explicitly downstream instead of the asset being mis-tagged. Read-only.
#[derive(Clone)]
pub struct ImageResolver {
    documents: Arc<dyn DocumentService>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key_prefix: String,
    allowed_media_types: Vec<String>,
    hires_rendition: String,
}

impl ImageResolver {
    pub fn new(
        documents: Arc<dyn DocumentService>,
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        key_prefix: &str,
        allowed_media_types: &[String],
        hires_rendition: &str,
    ) -> Self {
        Self {
            documents,
            store,
            bucket: bucket.to_string(),
            key_prefix: key_prefix.to_string(),
            allowed_media_types: allowed_media_types.to_vec(),
            hires_rendition: hires_rendition.to_string(),
        }
    }

    pub async fn resolve(&self, doc_id: &str) -> Result<ImageAsset> {
        let document = self.documents.fetch(doc_id).await?;
        let blob = select_blob(&document, &self.allowed_media_types, &self.hires_rendition)
            .ok_or_else(|| PipelineError::NotFound(doc_id.to_string()))?;
        let key = format!("{}{}", self.key_prefix, blob.digest);
        let bytes = self.store.get(&self.bucket, &key).await?;
        Ok(ImageAsset {
            doc_id: doc_id.to_string(),
            key,
            media_type: blob.media_type.clone(),
            bytes,
        })
    }
}

/// Primary content when its media type is allowed, else the named rendition,
/// else the primary content unchanged.
fn select_blob<'a>(
    document: &'a DocumentInfo,
    allowed_media_types: &[String],
    hires_rendition: &str,
) -> Option<&'a BlobRef> {
    let primary = document.content.as_ref()?;
    if allowed_media_types.iter().any(|m| m == primary.media_type.as_mime()) {
        return Some(primary);
    }
    warn!(
        doc_id = %document.id,
        media_type = primary.media_type.as_mime(),
        "unsupported primary media type, looking for a rendition"
    );
    match document.renditions.iter().find(|r| r.title == hires_rendition) {
        Some(rendition) => Some(&rendition.content),
        None => Some(primary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MemoryDocumentService, MemoryObjectStore};
    use crate::types::{MediaType, Rendition};

    fn blob(digest: &str, mime: &str) -> BlobRef {
        BlobRef { digest: digest.into(), media_type: MediaType::from_mime(mime) }
    }

    fn allowed() -> Vec<String> {
        vec!["image/jpeg".to_string(), "image/png".to_string()]
    }

    #[test]
    fn test_select_primary_when_allowed() {
        let document = DocumentInfo {
            id: "doc-1".into(),
            content: Some(blob("aaa", "image/jpeg")),
            renditions: vec![Rendition { title: "FullHD".into(), content: blob("bbb", "image/jpeg") }],
        };
        assert_eq!(select_blob(&document, &allowed(), "FullHD").unwrap().digest, "aaa");
    }

    #[test]
    fn test_select_rendition_when_primary_unsupported() {
        let document = DocumentInfo {
            id: "doc-1".into(),
            content: Some(blob("aaa", "image/tiff")),
            renditions: vec![
                Rendition { title: "Thumbnail".into(), content: blob("ttt", "image/jpeg") },
                Rendition { title: "FullHD".into(), content: blob("bbb", "image/jpeg") },
            ],
        };
        assert_eq!(select_blob(&document, &allowed(), "FullHD").unwrap().digest, "bbb");
    }

    #[test]
    fn test_falls_back_to_unsupported_primary() {
        let document = DocumentInfo {
            id: "doc-1".into(),
            content: Some(blob("aaa", "image/tiff")),
            renditions: vec![],
        };
        // decoding will fail downstream, explicitly
        assert_eq!(select_blob(&document, &allowed(), "FullHD").unwrap().digest, "aaa");
    }

    #[test]
    fn test_no_content_yields_none() {
        let document = DocumentInfo { id: "doc-1".into(), content: None, renditions: vec![] };
        assert!(select_blob(&document, &allowed(), "FullHD").is_none());
    }

    #[tokio::test]
    async fn test_resolve_builds_digest_key() {
        let documents = Arc::new(MemoryDocumentService::new());
        let store = Arc::new(MemoryObjectStore::new());
        documents
            .insert_document(DocumentInfo {
                id: "doc-1".into(),
                content: Some(blob("abc123", "image/png")),
                renditions: vec![],
            })
            .await;
        store.put("assets", "binaries/abc123", vec![1, 2, 3]).await;

        let resolver =
            ImageResolver::new(documents, store, "assets", "binaries/", &allowed(), "FullHD");
        let asset = resolver.resolve("doc-1").await.unwrap();
        assert_eq!(asset.key, "binaries/abc123");
        assert_eq!(asset.media_type, MediaType::Png);
        assert_eq!(asset.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_resolve_missing_content_is_not_found() {
        let documents = Arc::new(MemoryDocumentService::new());
        let store = Arc::new(MemoryObjectStore::new());
        documents
            .insert_document(DocumentInfo { id: "doc-1".into(), content: None, renditions: vec![] })
            .await;

        let resolver =
            ImageResolver::new(documents, store, "assets", "binaries/", &allowed(), "FullHD");
        let err = resolver.resolve("doc-1").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
