//! Identity search with bounded per-face fan-out.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::Result;
use crate::services::RecognitionService;
use crate::types::{CroppedFace, IdentityMatch};

/// Searches the identity index for cropped faces: one fixed collection, at
/// most one candidate per face, with the acceptance threshold enforced by
/// the service.
#[derive(Clone)]
pub struct MatchEngine {
    recognition: Arc<dyn RecognitionService>,
    collection_id: String,
    threshold: f32,
    pool_size: usize,
}

impl MatchEngine {
    pub fn new(
        recognition: Arc<dyn RecognitionService>,
        collection_id: &str,
        threshold: f32,
        pool_size: usize,
    ) -> Self {
        Self {
            recognition,
            collection_id: collection_id.to_string(),
            threshold,
            pool_size: pool_size.max(1),
        }
    }

    /// Top-1 identity for one cropped face, or `None` when the index returns
    /// no candidate above the threshold.
    pub async fn search_identity(&self, face: &CroppedFace) -> Result<Option<IdentityMatch>> {
        let matches = self
            .recognition
            .search_by_image(&self.collection_id, &face.bytes, 1, self.threshold)
            .await?;
        Ok(matches.into_iter().next())
    }

    /// Run the identity search for every cropped face of one image.
    ///
    /// Fan-out is bounded by the worker pool size and fanned back in as tasks
    /// finish, so matches arrive in completion order, not face order. A
    /// failed search excludes that face and never fails the image.
    pub async fn match_all(&self, faces: Vec<CroppedFace>) -> Vec<IdentityMatch> {
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks = JoinSet::new();

        for (face_index, face) in faces.into_iter().enumerate() {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };
                match engine.search_identity(&face).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(face_index, error = %e, "identity search failed, excluding face");
                        None
                    }
                }
            });
        }

        let mut matches = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(found)) => matches.push(found),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "identity search task failed"),
            }
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryRecognition;
    use crate::types::CropFormat;

    fn face() -> CroppedFace {
        CroppedFace { bytes: vec![1, 2, 3], format: CropFormat::Jpeg }
    }

    #[tokio::test]
    async fn test_candidate_below_threshold_is_none() {
        let recognition = Arc::new(MemoryRecognition::new());
        recognition.index_identity("person-1", 75.0).await;

        let engine = MatchEngine::new(recognition, "identities", 80.0, 4);
        assert!(engine.search_identity(&face()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_candidate_above_threshold_matches() {
        let recognition = Arc::new(MemoryRecognition::new());
        recognition.index_identity("person-1", 92.5).await;

        let engine = MatchEngine::new(recognition, "identities", 80.0, 4);
        let found = engine.search_identity(&face()).await.unwrap().unwrap();
        assert_eq!(found.identity_id, "person-1");
        assert!((found.confidence - 92.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_match_all_collects_matches() {
        let recognition = Arc::new(MemoryRecognition::new());
        recognition.index_identity("person-1", 90.0).await;

        let engine = MatchEngine::new(Arc::clone(&recognition) as _, "identities", 80.0, 2);
        let matches = engine.match_all(vec![face(), face(), face()]).await;
        assert_eq!(matches.len(), 3);
        assert_eq!(recognition.search_call_count(), 3);
    }

    #[tokio::test]
    async fn test_match_all_contains_per_face_failures() {
        let recognition = Arc::new(MemoryRecognition::new());
        recognition.set_fail_searches(true);

        let engine = MatchEngine::new(Arc::clone(&recognition) as _, "identities", 80.0, 2);
        let matches = engine.match_all(vec![face(), face()]).await;
        assert!(matches.is_empty());
        assert_eq!(recognition.search_call_count(), 2);
    }

    #[tokio::test]
    async fn test_match_all_empty_input() {
        let recognition = Arc::new(MemoryRecognition::new());
        let engine = MatchEngine::new(recognition, "identities", 80.0, 4);
        assert!(engine.match_all(vec![]).await.is_empty());
    }
}
