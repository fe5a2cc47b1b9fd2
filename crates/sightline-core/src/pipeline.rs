//! The resolve → detect → crop → match → write chain.

use std::collections::HashSet;

use crate::error::Result;
use crate::extractor::{crop_face, FaceExtractor};
use crate::matcher::MatchEngine;
use crate::resolver::ImageResolver;
use crate::types::{CroppedFace, IdentityMatch, MatchOutcome};
use crate::writer::ResultWriter;

/// One image, end to end: resolve the asset, detect faces, crop each region,
/// search the identity index, and write the accepted identities back.
///
/// The interactive path calls [`process`](ImagePipeline::process) directly;
/// the batch consumer runs the same chain per work item.
#[derive(Clone)]
pub struct ImagePipeline {
    resolver: ImageResolver,
    extractor: FaceExtractor,
    matcher: MatchEngine,
    writer: ResultWriter,
}

impl ImagePipeline {
    pub fn new(
        resolver: ImageResolver,
        extractor: FaceExtractor,
        matcher: MatchEngine,
        writer: ResultWriter,
    ) -> Self {
        Self { resolver, extractor, matcher, writer }
    }

    /// Process one document.
    ///
    /// Zero detected faces writes an empty identity set and returns
    /// [`MatchOutcome::NoFace`]; that is a normal outcome, not an error.
    pub async fn process(&self, doc_id: &str) -> Result<MatchOutcome> {
        let asset = self.resolver.resolve(doc_id).await?;
        let (image, regions) = self.extractor.detect_faces(&asset).await?;
        tracing::debug!(doc_id, key = %asset.key, faces = regions.len(), "face detection complete");

        if regions.is_empty() {
            self.writer.save_matches(doc_id, &[]).await?;
            return Ok(MatchOutcome::NoFace);
        }

        let crops: Vec<CroppedFace> = regions
            .iter()
            .filter_map(|region| crop_face(&image, region, &asset.media_type))
            .collect();

        let matches = self.matcher.match_all(crops).await;
        let identities = dedup_in_arrival_order(matches);
        self.writer.save_matches(doc_id, &identities).await?;

        if identities.is_empty() {
            Ok(MatchOutcome::NotDetected)
        } else {
            Ok(MatchOutcome::Detected { identities })
        }
    }
}

/// Ordered-set semantics: first occurrence wins, arrival order preserved.
fn dedup_in_arrival_order(matches: Vec<IdentityMatch>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut identities = Vec::new();
    for found in matches {
        if seen.insert(found.identity_id.clone()) {
            identities.push(found.identity_id);
        }
    }
    identities
}
