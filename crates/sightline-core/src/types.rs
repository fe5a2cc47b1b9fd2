use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media type of a stored image.
///
/// Only jpeg and png are handed to the decoder directly; anything else goes
/// through the resolver's high-resolution rendition fallback first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Jpeg,
    Png,
    /// Carried verbatim so downstream decoding fails explicitly instead of
    /// the asset being silently mis-tagged.
    Other(String),
}

impl MediaType {
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "image/jpeg" | "image/jpg" => MediaType::Jpeg,
            "image/png" => MediaType::Png,
            other => MediaType::Other(other.to_string()),
        }
    }

    /// Whether this media type is in the allowed set {jpeg, png}.
    pub fn is_allowed(&self) -> bool {
        matches!(self, MediaType::Jpeg | MediaType::Png)
    }

    pub fn as_mime(&self) -> &str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Other(mime) => mime,
        }
    }
}

/// Bounding box for a detected face, each coordinate a fraction of the image
/// dimensions in [0, 1]. Exists only while its image is being processed;
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRegion {
    /// Convert to absolute pixel coordinates by multiplying with the image
    /// dimensions and truncating.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> PixelRect {
        PixelRect {
            x: (self.left * image_width as f32) as u32,
            y: (self.top * image_height as f32) as u32,
            width: (self.width * image_width as f32) as u32,
            height: (self.height * image_height as f32) as u32,
        }
    }

    /// A region is usable only when it lies fully inside the unit square.
    /// NaN coordinates fail every comparison and are rejected too.
    pub fn is_normalized(&self) -> bool {
        self.left >= 0.0
            && self.top >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.left + self.width <= 1.0
            && self.top + self.height <= 1.0
    }
}

/// Absolute pixel crop window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(image_width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(image_height)
    }
}

/// Encoding used when a cropped face is re-encoded for the identity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropFormat {
    Jpeg,
    Png,
}

impl CropFormat {
    /// Png sources stay png; everything else re-encodes as jpeg.
    pub fn for_media_type(media_type: &MediaType) -> Self {
        match media_type {
            MediaType::Png => CropFormat::Png,
            _ => CropFormat::Jpeg,
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            CropFormat::Jpeg => image::ImageFormat::Jpeg,
            CropFormat::Png => image::ImageFormat::Png,
        }
    }
}

/// One face cropped out of a source image. Lives only between the crop and
/// the identity search call.
#[derive(Debug, Clone)]
pub struct CroppedFace {
    pub bytes: Vec<u8>,
    pub format: CropFormat,
}

/// Top-1 identity candidate for one cropped face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMatch {
    pub identity_id: String,
    pub confidence: f32,
}

/// Terminal outcome of processing one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No faces in the image. A normal outcome, not an error.
    NoFace,
    /// Faces were found but none matched a known identity.
    NotDetected,
    /// At least one face matched; identifiers in arrival order, de-duplicated.
    Detected { identities: Vec<String> },
}

impl MatchOutcome {
    pub fn identities(&self) -> &[String] {
        match self {
            MatchOutcome::Detected { identities } => identities,
            _ => &[],
        }
    }
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchOutcome::NoFace => write!(f, "no face"),
            MatchOutcome::NotDetected => write!(f, "not detected"),
            MatchOutcome::Detected { identities } => {
                write!(f, "detected: {}", identities.join(", "))
            }
        }
    }
}

/// An image pulled from the content store, ready for decoding.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub doc_id: String,
    pub key: String,
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
}

/// Reference to stored binary content, addressed by its digest.
#[derive(Debug, Clone)]
pub struct BlobRef {
    pub digest: String,
    pub media_type: MediaType,
}

/// A named alternate encoding of the same source image.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub title: String,
    pub content: BlobRef,
}

/// Document metadata needed to resolve an image: the primary content plus any
/// named renditions.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: String,
    pub content: Option<BlobRef>,
    pub renditions: Vec<Rendition>,
}

/// One queued unit of batch work. Owned by the queue while in flight and
/// removed only after the document write succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub bucket: String,
    pub key: String,
    pub doc_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(bucket: &str, key: &str, doc_id: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            doc_id: doc_id.to_string(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Model status as reported by the recognition service. Distinct from the
/// controller's local [`ModelState`](crate::lifecycle::ModelState).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    Other(String),
}

impl ModelStatus {
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "STOPPED" => ModelStatus::Stopped,
            "STARTING" => ModelStatus::Starting,
            "RUNNING" => ModelStatus::Running,
            "STOPPING" => ModelStatus::Stopping,
            "FAILED" => ModelStatus::Failed,
            other => ModelStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelStatus::Stopped => write!(f, "STOPPED"),
            ModelStatus::Starting => write!(f, "STARTING"),
            ModelStatus::Running => write!(f, "RUNNING"),
            ModelStatus::Stopping => write!(f, "STOPPING"),
            ModelStatus::Failed => write!(f, "FAILED"),
            ModelStatus::Other(status) => write!(f, "{status}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_pixels_truncates() {
        let region = FaceRegion {
            left: 0.1,
            top: 0.1,
            width: 0.5,
            height: 0.5,
            confidence: 0.99,
        };
        let rect = region.to_pixels(1000, 1000);
        assert_eq!(rect, PixelRect { x: 100, y: 100, width: 500, height: 500 });
        // crop window runs from (100,100) to (600,600)
        assert_eq!(rect.x + rect.width, 600);
        assert_eq!(rect.y + rect.height, 600);
    }

    #[test]
    fn test_to_pixels_fractional_truncation() {
        let region = FaceRegion {
            left: 0.333,
            top: 0.0,
            width: 0.333,
            height: 1.0,
            confidence: 1.0,
        };
        let rect = region.to_pixels(100, 100);
        assert_eq!(rect.x, 33);
        assert_eq!(rect.width, 33);
    }

    #[test]
    fn test_region_normalization() {
        let inside = FaceRegion { left: 0.2, top: 0.2, width: 0.6, height: 0.6, confidence: 1.0 };
        assert!(inside.is_normalized());

        let overflowing = FaceRegion { left: 0.8, top: 0.1, width: 0.5, height: 0.5, confidence: 1.0 };
        assert!(!overflowing.is_normalized());

        let negative = FaceRegion { left: -0.1, top: 0.1, width: 0.5, height: 0.5, confidence: 1.0 };
        assert!(!negative.is_normalized());

        let empty = FaceRegion { left: 0.1, top: 0.1, width: 0.0, height: 0.5, confidence: 1.0 };
        assert!(!empty.is_normalized());

        let nan = FaceRegion { left: f32::NAN, top: 0.1, width: 0.5, height: 0.5, confidence: 1.0 };
        assert!(!nan.is_normalized());
    }

    #[test]
    fn test_pixel_rect_bounds() {
        let rect = PixelRect { x: 100, y: 100, width: 500, height: 500 };
        assert!(rect.fits_within(1000, 1000));
        assert!(rect.fits_within(600, 600));
        assert!(!rect.fits_within(599, 1000));
        assert!(!rect.is_empty());
        assert!(PixelRect { x: 0, y: 0, width: 0, height: 10 }.is_empty());
    }

    #[test]
    fn test_media_type_parsing() {
        assert_eq!(MediaType::from_mime("image/jpeg"), MediaType::Jpeg);
        assert_eq!(MediaType::from_mime("image/png"), MediaType::Png);
        assert!(MediaType::from_mime("image/jpeg").is_allowed());
        let tiff = MediaType::from_mime("image/tiff");
        assert!(!tiff.is_allowed());
        assert_eq!(tiff.as_mime(), "image/tiff");
    }

    #[test]
    fn test_crop_format_defaults_to_jpeg() {
        assert_eq!(CropFormat::for_media_type(&MediaType::Png), CropFormat::Png);
        assert_eq!(CropFormat::for_media_type(&MediaType::Jpeg), CropFormat::Jpeg);
        // non-png sources all re-encode as jpeg, the documented default
        assert_eq!(
            CropFormat::for_media_type(&MediaType::Other("image/tiff".into())),
            CropFormat::Jpeg
        );
    }

    #[test]
    fn test_work_item_round_trip() {
        let item = WorkItem::new("assets", "binary/abc123", "doc-1");
        let json = item.to_json().unwrap();
        let parsed = WorkItem::from_json(&json).unwrap();
        assert_eq!(parsed.bucket, "assets");
        assert_eq!(parsed.key, "binary/abc123");
        assert_eq!(parsed.doc_id, "doc-1");
        assert_eq!(parsed.enqueued_at, item.enqueued_at);
    }

    #[test]
    fn test_work_item_rejects_garbage() {
        assert!(WorkItem::from_json("not json").is_err());
        assert!(WorkItem::from_json("{\"unexpected\":true}").is_err());
    }

    #[test]
    fn test_model_status_parse() {
        assert_eq!(ModelStatus::parse("RUNNING"), ModelStatus::Running);
        assert_eq!(ModelStatus::parse("running"), ModelStatus::Running);
        assert_eq!(ModelStatus::parse("STARTING"), ModelStatus::Starting);
        assert_eq!(
            ModelStatus::parse("TRAINING_COMPLETED"),
            ModelStatus::Other("TRAINING_COMPLETED".into())
        );
    }

    #[test]
    fn test_match_outcome_display() {
        assert_eq!(MatchOutcome::NoFace.to_string(), "no face");
        assert_eq!(MatchOutcome::NotDetected.to_string(), "not detected");
        let detected = MatchOutcome::Detected { identities: vec!["a".into(), "b".into()] };
        assert_eq!(detected.to_string(), "detected: a, b");
        assert_eq!(detected.identities(), &["a".to_string(), "b".to_string()]);
        assert!(MatchOutcome::NoFace.identities().is_empty());
    }
}
