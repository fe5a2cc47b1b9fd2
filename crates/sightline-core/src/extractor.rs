//! Face detection and geometric cropping.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::services::RecognitionService;
use crate::types::{CropFormat, CroppedFace, FaceRegion, ImageAsset, MediaType};

/// Decodes an asset and asks the recognition service for its face regions.
#[derive(Clone)]
pub struct FaceExtractor {
    recognition: Arc<dyn RecognitionService>,
}

impl FaceExtractor {
    pub fn new(recognition: Arc<dyn RecognitionService>) -> Self {
        Self { recognition }
    }

    /// Decode the asset and detect face regions, requesting full attribute
    /// detail. Zero regions is a valid result, not an error.
    pub async fn detect_faces(&self, asset: &ImageAsset) -> Result<(DynamicImage, Vec<FaceRegion>)> {
        let image = image::load_from_memory(&asset.bytes).map_err(|e| decode_error(asset, &e))?;
        let regions = self.recognition.detect_faces(&asset.bytes).await?;
        Ok((image, regions))
    }
}

fn decode_error(asset: &ImageAsset, err: &image::ImageError) -> PipelineError {
    if asset.media_type.is_allowed() {
        PipelineError::Decode { key: asset.key.clone(), reason: err.to_string() }
    } else {
        // The resolver found no allowed rendition and fell back to the
        // original blob; surface the media type rather than the decoder noise.
        PipelineError::UnsupportedMedia {
            doc_id: asset.doc_id.clone(),
            media_type: asset.media_type.as_mime().to_string(),
        }
    }
}

/// Crop one detected region out of a decoded image and re-encode it in the
/// source format (png stays png, everything else becomes jpeg).
///
/// Returns `None` when the geometry is invalid or the encode produces an
/// empty buffer. A bad crop is logged and skipped; it must not abort the
/// other faces of the same image.
pub fn crop_face(
    image: &DynamicImage,
    region: &FaceRegion,
    media_type: &MediaType,
) -> Option<CroppedFace> {
    let (image_width, image_height) = image.dimensions();
    let rect = region.to_pixels(image_width, image_height);
    if !region.is_normalized() || rect.is_empty() || !rect.fits_within(image_width, image_height) {
        warn!(?rect, confidence = region.confidence, "invalid crop geometry, skipping face");
        return None;
    }

    let format = CropFormat::for_media_type(media_type);
    let cropped = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
    // jpeg cannot carry an alpha channel
    let cropped = match format {
        CropFormat::Jpeg => DynamicImage::ImageRgb8(cropped.to_rgb8()),
        CropFormat::Png => cropped,
    };

    let mut buffer = Cursor::new(Vec::new());
    if let Err(e) = cropped.write_to(&mut buffer, format.image_format()) {
        warn!(error = %e, "failed to encode cropped face, skipping");
        return None;
    }
    let bytes = buffer.into_inner();
    if bytes.is_empty() {
        warn!("cropped face image is empty, skipping");
        return None;
    }
    Some(CroppedFace { bytes, format })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 0])
        }))
    }

    fn region(left: f32, top: f32, width: f32, height: f32) -> FaceRegion {
        FaceRegion { left, top, width, height, confidence: 0.95 }
    }

    #[test]
    fn test_crop_geometry() {
        let image = test_image(1000, 1000);
        let face = crop_face(&image, &region(0.1, 0.1, 0.5, 0.5), &MediaType::Png).unwrap();
        assert_eq!(face.format, CropFormat::Png);

        let decoded = image::load_from_memory(&face.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (500, 500));
    }

    #[test]
    fn test_crop_rejects_out_of_bounds() {
        let image = test_image(100, 100);
        assert!(crop_face(&image, &region(0.8, 0.1, 0.5, 0.5), &MediaType::Png).is_none());
        assert!(crop_face(&image, &region(-0.1, 0.1, 0.5, 0.5), &MediaType::Png).is_none());
    }

    #[test]
    fn test_crop_rejects_degenerate_region() {
        let image = test_image(100, 100);
        // truncates to a zero-width pixel window
        assert!(crop_face(&image, &region(0.5, 0.5, 0.005, 0.5), &MediaType::Png).is_none());
    }

    #[test]
    fn test_crop_format_follows_source() {
        let image = test_image(100, 100);
        let png = crop_face(&image, &region(0.0, 0.0, 1.0, 1.0), &MediaType::Png).unwrap();
        assert_eq!(png.format, CropFormat::Png);
        assert_eq!(image::guess_format(&png.bytes).unwrap(), image::ImageFormat::Png);

        let jpeg = crop_face(&image, &region(0.0, 0.0, 1.0, 1.0), &MediaType::Jpeg).unwrap();
        assert_eq!(jpeg.format, CropFormat::Jpeg);
        assert_eq!(image::guess_format(&jpeg.bytes).unwrap(), image::ImageFormat::Jpeg);

        // undetected media types fall back to jpeg
        let other = crop_face(
            &image,
            &region(0.0, 0.0, 1.0, 1.0),
            &MediaType::Other("image/tiff".into()),
        )
        .unwrap();
        assert_eq!(other.format, CropFormat::Jpeg);
    }

    #[test]
    fn test_jpeg_crop_of_alpha_image() {
        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            64,
            64,
            image::Rgba([10, 20, 30, 128]),
        ));
        let face = crop_face(&rgba, &region(0.0, 0.0, 1.0, 1.0), &MediaType::Jpeg).unwrap();
        assert_eq!(image::guess_format(&face.bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_detect_faces_decode_failure() {
        use crate::services::MemoryRecognition;

        let extractor = FaceExtractor::new(Arc::new(MemoryRecognition::new()));
        let asset = ImageAsset {
            doc_id: "doc-1".into(),
            key: "binaries/abc".into(),
            media_type: MediaType::Jpeg,
            bytes: vec![0, 1, 2, 3],
        };
        let err = extractor.detect_faces(&asset).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));

        let unsupported = ImageAsset {
            doc_id: "doc-1".into(),
            key: "binaries/abc".into(),
            media_type: MediaType::Other("image/tiff".into()),
            bytes: vec![0, 1, 2, 3],
        };
        let err = extractor.detect_faces(&unsupported).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedMedia { .. }));
    }
}
