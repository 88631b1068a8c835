use crate::application::ports::AssetCompressor;
use crate::domain::entities::EncodedImage;
use crate::shared::error::AppError;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// 写真・署名を縮小して JPEG にエンコードする。
pub struct JpegCompressor {
    quality: u8,
}

impl JpegCompressor {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegCompressor {
    fn default() -> Self {
        Self::new(80)
    }
}

#[async_trait]
impl AssetCompressor for JpegCompressor {
    async fn compress(&self, raw: &[u8], max_dimension: u32) -> Result<EncodedImage, AppError> {
        if raw.is_empty() {
            return Err(AppError::Compression("image data is empty".to_string()));
        }
        if max_dimension == 0 {
            return Err(AppError::Compression(
                "max dimension must be greater than 0".to_string(),
            ));
        }

        let raw = raw.to_vec();
        let quality = self.quality;
        let encoded =
            tokio::task::spawn_blocking(move || encode_jpeg(&raw, max_dimension, quality))
                .await
                .map_err(|err| AppError::Compression(format!("compression task failed: {err}")))??;

        tracing::debug!(
            target: "offline::capture",
            width = encoded.width,
            height = encoded.height,
            bytes = encoded.len(),
            "image compressed"
        );
        Ok(encoded)
    }
}

/// 長辺が `max_dimension` を超える場合のみ縮小した寸法を返す。拡大はしない。
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_dimension {
        return (width, height);
    }

    let scale = |edge: u32| -> u32 {
        let scaled = (u64::from(edge) * u64::from(max_dimension) + u64::from(longer) / 2)
            / u64::from(longer);
        u32::try_from(scaled).unwrap_or(max_dimension).max(1)
    };

    if width >= height {
        (max_dimension, scale(height))
    } else {
        (scale(width), max_dimension)
    }
}

fn encode_jpeg(raw: &[u8], max_dimension: u32, quality: u8) -> Result<EncodedImage, AppError> {
    let decoded = image::load_from_memory(raw)
        .map_err(|err| AppError::Compression(format!("failed to decode image: {err}")))?;

    let (width, height) = decoded.dimensions();
    let (target_width, target_height) = target_dimensions(width, height, max_dimension);
    let resized = if (target_width, target_height) == (width, height) {
        decoded
    } else {
        decoded.resize_exact(target_width, target_height, FilterType::Triangle)
    };

    let flattened = flatten_onto_white(&resized);
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(&flattened)
        .map_err(|err| AppError::Compression(format!("failed to encode JPEG: {err}")))?;

    Ok(EncodedImage::new(
        JPEG_CONTENT_TYPE,
        flattened.width(),
        flattened.height(),
        bytes,
    ))
}

/// 透過部分を白背景に合成する。
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let pixel = rgba.get_pixel(x, y);
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            let value = (u16::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255;
            value as u8
        };
        image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, pixel: Rgba<u8>) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, pixel);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn target_dimensions_scale_longer_edge_only() {
        assert_eq!(target_dimensions(4000, 3000, 1024), (1024, 768));
        assert_eq!(target_dimensions(3000, 4000, 1024), (768, 1024));
        assert_eq!(target_dimensions(800, 600, 1024), (800, 600));
        assert_eq!(target_dimensions(5000, 1, 1024), (1024, 1));
        assert_eq!(target_dimensions(1024, 1024, 1024), (1024, 1024));
    }

    #[tokio::test]
    async fn downscales_and_encodes_jpeg() {
        let compressor = JpegCompressor::default();
        let raw = png(400, 300, Rgba([10, 120, 200, 255]));

        let encoded = compressor.compress(&raw, 128).await.unwrap();
        assert_eq!((encoded.width, encoded.height), (128, 96));
        assert_eq!(encoded.content_type, JPEG_CONTENT_TYPE);
        assert_eq!(&encoded.bytes[..2], &[0xff, 0xd8]);
        assert!(encoded.verify());

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (128, 96));
    }

    #[tokio::test]
    async fn small_images_are_not_upscaled() {
        let compressor = JpegCompressor::new(90);
        let encoded = compressor
            .compress(&png(40, 20, Rgba([0, 0, 0, 255])), 1024)
            .await
            .unwrap();
        assert_eq!((encoded.width, encoded.height), (40, 20));
    }

    #[tokio::test]
    async fn transparent_pixels_become_white() {
        let compressor = JpegCompressor::new(100);
        let encoded = compressor
            .compress(&png(16, 16, Rgba([0, 0, 0, 0])), 1024)
            .await
            .unwrap();
        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgb8();
        let pixel = decoded.get_pixel(8, 8);
        assert!(pixel.0.iter().all(|channel| *channel > 245), "{pixel:?}");
    }

    #[tokio::test]
    async fn corrupt_or_empty_input_fails_without_output() {
        let compressor = JpegCompressor::default();
        for raw in [&b""[..], &b"not an image"[..]] {
            let err = compressor.compress(raw, 1024).await.unwrap_err();
            assert!(matches!(err, AppError::Compression(_)));
        }
        let err = compressor
            .compress(&png(2, 2, Rgba([1, 2, 3, 255])), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Compression(_)));
    }
}
