// THEORY:
// `RawImage` is the "dumb" data container of the triage engine. It owns a decoded
// height × width × 3 grid of 8-bit samples and knows how to summarise itself
// (luminance plane, mean intensity), but it never compares itself to anything and
// never changes after decoding.
//
// Key architectural principles:
// 1.  **Single Entry Point**: `RawImage::decode` is the only way raw upload bytes
//     become pixels. It sniffs the container, accepts JPEG and PNG only, and
//     rejects empty or zero-area results before any other stage sees them.
// 2.  **Immutability**: Every later stage borrows the image. Enhancement and
//     tensor construction allocate their own buffers.
// 3.  **One Luminance Definition**: Rec. 601 luma is used everywhere a single
//     intensity channel is needed, so the enhancer and the heuristic classifier
//     agree on what "bright" means.

use crate::error::DecodeError;
use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};

pub type Luminance = f64;

// Rec. 601 weights in thousandths, so sums stay exact.
const LUMA_RED: u32 = 299;
const LUMA_GREEN: u32 = 587;
const LUMA_BLUE: u32 = 114;
pub const LUMA_SCALE: u32 = 1000;

/// Rec. 601 luma of one RGB sample in thousandths (0..=255_000).
#[inline]
pub fn luminance_milli(pixel: &Rgb<u8>) -> u32 {
    LUMA_RED * pixel[0] as u32 + LUMA_GREEN * pixel[1] as u32 + LUMA_BLUE * pixel[2] as u32
}

/// Rec. 601 luma of one RGB sample, on the 0..255 scale.
#[inline]
pub fn luminance(pixel: &Rgb<u8>) -> Luminance {
    luminance_milli(pixel) as f64 / LUMA_SCALE as f64
}

/// An immutable, decoded 3-channel radiograph.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pixels: RgbImage,
}

impl RawImage {
    /// Decodes an uploaded JPEG or PNG buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let format = image::guess_format(bytes).map_err(|_| DecodeError::UnsupportedFormat)?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Err(DecodeError::UnsupportedFormat);
        }

        let decoded = image::load_from_memory_with_format(bytes, format)?;
        Self::from_rgb(decoded.to_rgb8())
    }

    /// Wraps an already-decoded pixel grid, applying the same zero-area check as `decode`.
    pub fn from_rgb(pixels: RgbImage) -> Result<Self, DecodeError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroArea { width, height });
        }
        Ok(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Single-channel intensity plane, rounded Rec. 601 luma.
    pub fn luminance_plane(&self) -> GrayImage {
        let (width, height) = self.dimensions();
        GrayImage::from_fn(width, height, |x, y| {
            let milli = luminance_milli(self.pixels.get_pixel(x, y));
            Luma([((milli + LUMA_SCALE / 2) / LUMA_SCALE).min(255) as u8])
        })
    }

    pub fn pixel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Exact sum of every pixel's luma, in thousandths.
    pub fn luminance_sum_milli(&self) -> u64 {
        self.pixels
            .pixels()
            .map(|pixel| luminance_milli(pixel) as u64)
            .sum()
    }

    /// Mean luminance over every pixel, unrounded.
    pub fn mean_intensity(&self) -> Luminance {
        // Never zero: construction rejects zero-area grids.
        let count = self.pixel_count() * LUMA_SCALE as u64;
        self.luminance_sum_milli() as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageEncoder;
    use image::codecs::png::PngEncoder;

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut buffer = Vec::new();
        PngEncoder::new(&mut buffer)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgb8,
            )
            .expect("Error encoding PNG.");
        buffer
    }

    #[test]
    fn decodes_png_with_original_dimensions() {
        let source = RgbImage::from_pixel(7, 3, Rgb([10, 20, 30]));
        let decoded = RawImage::decode(&png_bytes(&source)).expect("decode");
        assert_eq!(decoded.dimensions(), (7, 3));
        assert_eq!(decoded.pixels().get_pixel(6, 2), &Rgb([10, 20, 30]));
    }

    #[test]
    fn decodes_jpeg() {
        let source = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
        let mut buffer = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut buffer)
            .encode_image(&source)
            .expect("Error encoding JPEG.");
        let decoded = RawImage::decode(&buffer).expect("decode");
        assert_eq!(decoded.dimensions(), (16, 16));
    }

    #[test]
    fn rejects_empty_buffer() {
        assert!(matches!(RawImage::decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn rejects_garbage_bytes() {
        let garbage = b"definitely not a radiograph";
        assert!(matches!(
            RawImage::decode(garbage),
            Err(DecodeError::UnsupportedFormat)
        ));
    }

    #[test]
    fn rejects_truncated_png() {
        let source = RgbImage::from_pixel(32, 32, Rgb([1, 2, 3]));
        let bytes = png_bytes(&source);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(
            RawImage::decode(truncated),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_jpeg_png_formats() {
        let source = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let mut buffer = std::io::Cursor::new(Vec::new());
        source
            .write_to(&mut buffer, ImageFormat::Bmp)
            .expect("Error encoding BMP.");
        assert!(matches!(
            RawImage::decode(buffer.get_ref()),
            Err(DecodeError::UnsupportedFormat)
        ));
    }

    #[test]
    fn rejects_zero_area_grid() {
        let empty = RgbImage::new(0, 5);
        assert!(matches!(
            RawImage::from_rgb(empty),
            Err(DecodeError::ZeroArea { width: 0, height: 5 })
        ));
    }

    #[test]
    fn mean_intensity_of_gray_equals_gray_level() {
        let image = RawImage::from_rgb(RgbImage::from_pixel(5, 5, Rgb([110, 110, 110]))).unwrap();
        assert!((image.mean_intensity() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn luminance_weights_green_most() {
        let red = luminance(&Rgb([255, 0, 0]));
        let green = luminance(&Rgb([0, 255, 0]));
        let blue = luminance(&Rgb([0, 0, 255]));
        assert!(green > red && red > blue);
        assert!((luminance(&Rgb([255, 255, 255])) - 255.0).abs() < 1e-9);
    }

    #[test]
    fn gray_levels_have_exact_luminance() {
        for value in 0..=255u8 {
            let pixel = Rgb([value, value, value]);
            assert_eq!(luminance_milli(&pixel), value as u32 * LUMA_SCALE);
            assert_eq!(luminance(&pixel), value as f64);
        }
    }

    #[test]
    fn mean_intensity_is_exact_at_threshold_levels() {
        for value in [95u8, 130] {
            let image = RawImage::from_rgb(RgbImage::from_pixel(16, 16, Rgb([value, value, value]))).unwrap();
            assert_eq!(image.mean_intensity(), value as f64);
            assert_eq!(image.luminance_sum_milli(), 256 * value as u64 * 1000);
            assert!(image.luminance_plane().pixels().all(|p| p[0] == value));
        }
    }
}
