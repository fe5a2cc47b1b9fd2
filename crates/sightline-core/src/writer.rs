//! Persists accepted matches onto the source document.

use std::sync::Arc;

use crate::error::Result;
use crate::services::DocumentService;

/// Writes the recognized-identities field. The write replaces the field
/// wholesale within the repository's per-document transaction, so re-running
/// with the same detected faces stores the same value and a failed write
/// leaves the prior state intact.
#[derive(Clone)]
pub struct ResultWriter {
    documents: Arc<dyn DocumentService>,
}

impl ResultWriter {
    pub fn new(documents: Arc<dyn DocumentService>) -> Self {
        Self { documents }
    }

    pub async fn save_matches(&self, doc_id: &str, identities: &[String]) -> Result<()> {
        self.documents.save_identities(doc_id, identities).await?;
        tracing::info!(doc_id, count = identities.len(), "recognized identities saved");
        Ok(())
    }
}
