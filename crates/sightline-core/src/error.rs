use thiserror::Error;

/// Failure taxonomy for the recognition pipeline.
///
/// The transient/permanent split drives the batch consumer: transient
/// failures leave the work item for queue redelivery, permanent ones are
/// logged and the item is dropped.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("document {0} has no image content")]
    NotFound(String),

    #[error("document {doc_id}: no decodable rendition (media type {media_type})")]
    UnsupportedMedia { doc_id: String, media_type: String },

    #[error("image decode failed for {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("recognition service: {0}")]
    Recognition(String),

    #[error("object storage: {0}")]
    Storage(String),

    #[error("work queue: {0}")]
    Queue(String),

    #[error("document repository: {0}")]
    Persistence(String),
}

impl PipelineError {
    /// Transient failures are retried via queue redelivery; everything else
    /// is an input defect that a retry cannot fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Recognition(_)
                | PipelineError::Storage(_)
                | PipelineError::Queue(_)
                | PipelineError::Persistence(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PipelineError::Recognition("timeout".into()).is_transient());
        assert!(PipelineError::Storage("503".into()).is_transient());
        assert!(PipelineError::Persistence("write failed".into()).is_transient());
        assert!(PipelineError::Queue("receive failed".into()).is_transient());

        assert!(!PipelineError::NotFound("doc-1".into()).is_transient());
        assert!(!PipelineError::Decode { key: "k".into(), reason: "corrupt".into() }.is_transient());
        assert!(!PipelineError::UnsupportedMedia {
            doc_id: "doc-1".into(),
            media_type: "image/tiff".into()
        }
        .is_transient());
    }
}
