//! Image normalisation: raw bytes → bounded JPEG → base64 [`NormalizedPayload`].
//!
//! Radiographs arrive as 16-bit grayscale PNGs, RGBA screenshots, palette
//! images or huge scans. The model only needs a JPEG whose longer edge fits
//! the configured bound, so every input is flattened to 8-bit grayscale or
//! RGB, downsampled with Lanczos3 if needed, and re-encoded.

use crate::error::ItemError;
use crate::output::SourceImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// MIME type of every normalised payload.
pub const PAYLOAD_MIME_TYPE: &str = "image/jpeg";

/// A normalised image ready for the vision API and for embedding in HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPayload {
    pub mime_type: &'static str,
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
}

impl NormalizedPayload {
    /// `data:` URI for this payload.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }

    /// Provider image attachment tagged at the highest detail level.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.base64_data.clone(), self.mime_type).with_detail("high")
    }
}

/// Decode, flatten, downsample and JPEG-encode one source image.
///
/// CPU-bound; call [`normalize_blocking`] from async code.
pub fn normalize(
    source: &SourceImage,
    max_dimension: u32,
    jpeg_quality: u8,
) -> Result<NormalizedPayload, ItemError> {
    let decoded = image::load_from_memory(&source.bytes).map_err(|e| ItemError::Decode {
        detail: e.to_string(),
    })?;
    debug!(
        "Decoded {} → {}x{} {:?}",
        source.filename,
        decoded.width(),
        decoded.height(),
        decoded.color()
    );

    let img = fit_within(flatten_colour(decoded), max_dimension);

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality);
    img.write_with_encoder(encoder)
        .map_err(|e| ItemError::Encode {
            detail: e.to_string(),
        })?;

    let base64_data = STANDARD.encode(&buf);
    debug!(
        "Encoded {} → {}x{} JPEG, {} bytes base64",
        source.filename,
        img.width(),
        img.height(),
        base64_data.len()
    );

    Ok(NormalizedPayload {
        mime_type: PAYLOAD_MIME_TYPE,
        base64_data,
        width: img.width(),
        height: img.height(),
    })
}

/// Run [`normalize`] on the blocking thread pool.
pub async fn normalize_blocking(
    source: SourceImage,
    max_dimension: u32,
    jpeg_quality: u8,
) -> Result<NormalizedPayload, ItemError> {
    tokio::task::spawn_blocking(move || normalize(&source, max_dimension, jpeg_quality))
        .await
        .map_err(|e| ItemError::Decode {
            detail: format!("normalise task panicked: {e}"),
        })?
}

/// Reduce to a layout the JPEG encoder accepts.
///
/// 8-bit grayscale and RGB pass through; 16-bit grayscale drops to 8-bit;
/// anything with alpha or wider channels becomes RGB.
fn flatten_colour(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img,
        DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(img.to_luma8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Scale down uniformly so neither edge exceeds `max_dimension`.
fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width() <= max_dimension && img.height() <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("png encode");
        buf
    }

    fn decode_payload(payload: &NormalizedPayload) -> DynamicImage {
        let bytes = STANDARD.decode(&payload.base64_data).expect("valid base64");
        image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).expect("valid jpeg")
    }

    #[test]
    fn rgba_is_flattened_to_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 8, Rgba([255, 0, 0, 128])));
        let source = SourceImage::new("red.png", png_bytes(&img));

        let payload = normalize(&source, 2048, 95).expect("normalise should succeed");
        assert_eq!(payload.mime_type, "image/jpeg");
        assert_eq!((payload.width, payload.height), (10, 8));

        let decoded = decode_payload(&payload);
        assert_eq!((decoded.width(), decoded.height()), (10, 8));
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn oversized_image_is_bounded_and_keeps_aspect() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(3000, 1500, Luma([90])));
        let source = SourceImage::new("wide.png", png_bytes(&img));

        let payload = normalize(&source, 2048, 95).unwrap();
        assert_eq!(payload.width, 2048);
        assert_eq!(payload.height, 1024);

        let decoded = decode_payload(&payload);
        assert!(decoded.width().max(decoded.height()) <= 2048);
    }

    #[test]
    fn tall_image_is_bounded_on_height() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(500, 4000, Luma([200])));
        let source = SourceImage::new("tall.png", png_bytes(&img));

        let payload = normalize(&source, 1000, 95).unwrap();
        assert_eq!(payload.height, 1000);
        assert!(payload.width <= 125 && payload.width >= 124);
    }

    #[test]
    fn grayscale_sixteen_bit_is_reduced() {
        let img = DynamicImage::ImageLuma16(image::ImageBuffer::from_pixel(4, 4, Luma([40_000u16])));
        let flat = flatten_colour(img);
        assert!(matches!(flat, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let source = SourceImage::new("notes.txt", b"definitely not an image".to_vec());
        let err = normalize(&source, 2048, 95).unwrap_err();
        assert!(matches!(err, ItemError::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn base64_round_trip_recovers_jpeg_bytes() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([10])));
        let payload = normalize(&SourceImage::new("a.png", png_bytes(&img)), 2048, 95).unwrap();

        let bytes = STANDARD.decode(&payload.base64_data).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");
        assert_eq!(STANDARD.encode(&bytes), payload.base64_data);
    }

    #[test]
    fn image_data_is_high_detail_jpeg() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([0])));
        let payload = normalize(&SourceImage::new("a.png", png_bytes(&img)), 2048, 95).unwrap();
        let data = payload.to_image_data();
        assert_eq!(data.mime_type, "image/jpeg");
        assert_eq!(data.data, payload.base64_data);
        assert!(payload.data_uri().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn blocking_wrapper_matches_sync() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([77])));
        let source = SourceImage::new("a.png", png_bytes(&img));
        let sync = normalize(&source, 2048, 95).unwrap();
        let async_ = normalize_blocking(source, 2048, 95).await.unwrap();
        assert_eq!(sync, async_);
    }
}
