// THEORY:
// Pseudocolor mapping for the density overlay. An 8-bit intensity is mapped to the
// "jet" progression: dark blue for the least dense regions, through cyan, green and
// yellow, to dark red for the most dense.
//
// The table is computed once into a 256-entry `OnceLock` LUT; the per-pixel hot
// path is a single index.

use image::{GrayImage, Rgb, RgbImage};
use std::sync::OnceLock;

static JET_LUT: OnceLock<[Rgb<u8>; 256]> = OnceLock::new();

/// Piecewise-linear jet ramp for `t` in [0, 1], each channel in [0, 1].
fn jet(t: f32) -> [f32; 3] {
    let ramp = |center: f32| (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0);
    [ramp(3.0), ramp(2.0), ramp(1.0)]
}

fn jet_lut() -> &'static [Rgb<u8>; 256] {
    JET_LUT.get_or_init(|| {
        let mut table = [Rgb([0u8; 3]); 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let [r, g, b] = jet(i as f32 / 255.0);
            *entry = Rgb([
                (r * 255.0).round() as u8,
                (g * 255.0).round() as u8,
                (b * 255.0).round() as u8,
            ]);
        }
        table
    })
}

/// Maps one intensity to its jet color.
#[inline]
pub fn jet_color(intensity: u8) -> Rgb<u8> {
    jet_lut()[intensity as usize]
}

/// Applies the jet colormap to a whole intensity plane.
pub fn apply_jet(plane: &GrayImage) -> RgbImage {
    let (width, height) = plane.dimensions();
    RgbImage::from_fn(width, height, |x, y| jet_color(plane.get_pixel(x, y)[0]))
}
