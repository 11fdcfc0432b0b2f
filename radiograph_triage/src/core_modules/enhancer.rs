// THEORY:
// The `Enhancer` produces the display-only density overlay. It is a fixed four step
// transform and has no failure path for a decoded image:
//
//   RawImage ─► luminance plane ─► contrast enhancement ─► jet pseudocolor ─► blend
//
// The blend keeps 60% of the original radiograph and lays 40% of the pseudocolor
// over it, so anatomy stays readable underneath the heat. The result is never fed
// back into classification.

use crate::core_modules::colormap::apply_jet;
use crate::core_modules::contrast::ContrastMode;
use crate::core_modules::raw_image::RawImage;
use image::{ImageEncoder, Rgb, RgbImage};

pub const ORIGINAL_WEIGHT: f32 = 0.6;
pub const OVERLAY_WEIGHT: f32 = 0.4;

/// The blended false-color rendering. Same dimensions as its source image.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedImage {
    pixels: RgbImage,
}

impl EnhancedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbImage {
        self.pixels
    }

    /// PNG bytes for collaborators that render or store the overlay.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buffer = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
        encoder.write_image(
            self.pixels.as_raw(),
            self.pixels.width(),
            self.pixels.height(),
            image::ExtendedColorType::Rgb8,
        )?;
        Ok(buffer)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Enhancer {
    contrast: ContrastMode,
}

impl Enhancer {
    pub fn new(contrast: ContrastMode) -> Self {
        Self { contrast }
    }

    pub fn contrast(&self) -> ContrastMode {
        self.contrast
    }

    pub fn enhance(&self, image: &RawImage) -> EnhancedImage {
        let plane = image.luminance_plane();
        let equalized = self.contrast.apply(&plane);
        let heatmap = apply_jet(&equalized);
        EnhancedImage {
            pixels: blend(image.pixels(), &heatmap),
        }
    }
}

/// Saturating weighted sum of two equally sized images.
fn blend(original: &RgbImage, overlay: &RgbImage) -> RgbImage {
    let (width, height) = original.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let base = original.get_pixel(x, y);
        let heat = overlay.get_pixel(x, y);
        let mix = |c: usize| {
            let value = ORIGINAL_WEIGHT * base[c] as f32 + OVERLAY_WEIGHT * heat[c] as f32;
            value.round().clamp(0.0, 255.0) as u8
        };
        Rgb([mix(0), mix(1), mix(2)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::colormap::jet_color;

    fn raw(width: u32, height: u32, value: u8) -> RawImage {
        RawImage::from_rgb(RgbImage::from_pixel(width, height, Rgb([value, value, value]))).unwrap()
    }

    #[test]
    fn output_dimensions_match_input_for_every_mode() {
        let shapes = [(1, 1), (2, 9), (31, 17), (64, 64)];
        for mode in [ContrastMode::Global, ContrastMode::adaptive()] {
            let enhancer = Enhancer::new(mode);
            for &(w, h) in &shapes {
                let image = RawImage::from_rgb(RgbImage::from_fn(w, h, |x, y| {
                    Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
                }))
                .unwrap();
                assert_eq!(enhancer.enhance(&image).dimensions(), (w, h));
            }
        }
    }

    #[test]
    fn uniform_image_blends_with_top_of_colormap() {
        // A flat plane equalizes to 255 everywhere.
        let enhanced = Enhancer::default().enhance(&raw(4, 4, 100));
        let heat = jet_color(255);
        let expected = Rgb([
            (0.6 * 100.0 + 0.4 * heat[0] as f32).round() as u8,
            (0.6 * 100.0 + 0.4 * heat[1] as f32).round() as u8,
            (0.6 * 100.0 + 0.4 * heat[2] as f32).round() as u8,
        ]);
        assert!(enhanced.pixels().pixels().all(|p| *p == expected));
    }

    #[test]
    fn blend_is_weighted_and_saturating() {
        let white = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        let black = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        assert_eq!(blend(&white, &white).get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(blend(&white, &black).get_pixel(0, 0), &Rgb([153, 153, 153]));
        assert_eq!(blend(&black, &white).get_pixel(0, 0), &Rgb([102, 102, 102]));
    }

    #[test]
    fn encoded_png_round_trips_dimensions() {
        let enhanced = Enhancer::default().enhance(&raw(12, 5, 40));
        let bytes = enhanced.encode_png().expect("encode");
        let decoded = RawImage::decode(&bytes).expect("decode");
        assert_eq!(decoded.dimensions(), (12, 5));
    }
}
