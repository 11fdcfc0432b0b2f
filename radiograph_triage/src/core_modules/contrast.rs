// THEORY:
// Contrast enhancement spreads the intensity histogram of the luminance plane so
// that dense regions separate visually from soft tissue before pseudocoloring.
//
// Two deterministic modes are offered:
// 1.  **Global**: classic histogram equalization over the whole plane. Every pixel
//     of the same input level maps to the same output level.
// 2.  **Adaptive**: contrast-limited adaptive equalization (CLAHE). The plane is cut
//     into a grid of tiles; each tile gets its own clipped equalization curve, and
//     each pixel blends the curves of the four nearest tile centers bilinearly so
//     tile seams do not show. The clip limit bounds how steep a curve can get,
//     which keeps noise in flat regions from being amplified.

use crate::error::ConfigError;
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLIP_LIMIT: f32 = 2.0;
pub const DEFAULT_TILE_GRID: u32 = 8;

const BINS: usize = 256;

/// Number of tiles along each axis for adaptive equalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub columns: u32,
    pub rows: u32,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            columns: DEFAULT_TILE_GRID,
            rows: DEFAULT_TILE_GRID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ContrastMode {
    #[default]
    Global,
    Adaptive { clip_limit: f32, tile_grid: TileGrid },
}

impl ContrastMode {
    /// CLAHE with a clip limit of 2.0 on an 8×8 grid.
    pub fn adaptive() -> Self {
        ContrastMode::Adaptive {
            clip_limit: DEFAULT_CLIP_LIMIT,
            tile_grid: TileGrid::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            ContrastMode::Global => Ok(()),
            ContrastMode::Adaptive { clip_limit, tile_grid } => {
                if !clip_limit.is_finite() || clip_limit <= 0.0 {
                    return Err(ConfigError::InvalidContrast(format!(
                        "clip limit must be positive, got {clip_limit}"
                    )));
                }
                if tile_grid.columns == 0 || tile_grid.rows == 0 {
                    return Err(ConfigError::InvalidContrast(format!(
                        "tile grid must be at least 1x1, got {}x{}",
                        tile_grid.columns, tile_grid.rows
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn apply(&self, plane: &GrayImage) -> GrayImage {
        match *self {
            ContrastMode::Global => imageproc::contrast::equalize_histogram(plane),
            ContrastMode::Adaptive { clip_limit, tile_grid } => clahe(plane, clip_limit, tile_grid),
        }
    }
}

/// Tile layout actually used for a plane: never more tiles than pixels.
struct TileLayout {
    tile_width: u32,
    tile_height: u32,
    columns: u32,
    rows: u32,
}

impl TileLayout {
    fn new(width: u32, height: u32, grid: TileGrid) -> Self {
        let tile_width = width.div_ceil(grid.columns.clamp(1, width));
        let tile_height = height.div_ceil(grid.rows.clamp(1, height));
        Self {
            tile_width,
            tile_height,
            columns: width.div_ceil(tile_width),
            rows: height.div_ceil(tile_height),
        }
    }
}

fn clahe(plane: &GrayImage, clip_limit: f32, grid: TileGrid) -> GrayImage {
    let (width, height) = plane.dimensions();
    if width == 0 || height == 0 {
        return plane.clone();
    }
    let layout = TileLayout::new(width, height, grid);

    let mut curves = Vec::with_capacity((layout.columns * layout.rows) as usize);
    for row in 0..layout.rows {
        for column in 0..layout.columns {
            let x0 = column * layout.tile_width;
            let y0 = row * layout.tile_height;
            let x1 = (x0 + layout.tile_width).min(width);
            let y1 = (y0 + layout.tile_height).min(height);
            curves.push(tile_curve(plane, (x0, x1), (y0, y1), clip_limit));
        }
    }

    let curve_at = |column: usize, row: usize| &curves[row * layout.columns as usize + column];

    GrayImage::from_fn(width, height, |x, y| {
        let level = plane.get_pixel(x, y)[0] as usize;
        let (left, right, wx) = neighbour_tiles(x, layout.tile_width, layout.columns);
        let (top, bottom, wy) = neighbour_tiles(y, layout.tile_height, layout.rows);

        let upper = lerp(curve_at(left, top)[level], curve_at(right, top)[level], wx);
        let lower = lerp(curve_at(left, bottom)[level], curve_at(right, bottom)[level], wx);
        let value = upper * (1.0 - wy) + lower * wy;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

#[inline]
fn lerp(a: u8, b: u8, weight: f32) -> f32 {
    a as f32 * (1.0 - weight) + b as f32 * weight
}

/// The two tile indices whose centers bracket `position` and the weight of the second.
fn neighbour_tiles(position: u32, tile_size: u32, tiles: u32) -> (usize, usize, f32) {
    let grid_position = (position as f32 + 0.5) / tile_size as f32 - 0.5;
    if grid_position <= 0.0 {
        return (0, 0, 0.0);
    }
    let lower = grid_position.floor() as u32;
    if lower >= tiles - 1 {
        let last = (tiles - 1) as usize;
        return (last, last, 0.0);
    }
    (lower as usize, lower as usize + 1, grid_position - lower as f32)
}

/// Clipped equalization curve for one tile.
fn tile_curve(plane: &GrayImage, xs: (u32, u32), ys: (u32, u32), clip_limit: f32) -> [u8; BINS] {
    let mut histogram = [0u32; BINS];
    for y in ys.0..ys.1 {
        for x in xs.0..xs.1 {
            histogram[plane.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = (xs.1 - xs.0) * (ys.1 - ys.0);

    let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);
    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    // Clipped mass goes back evenly; the remainder is spread at a fixed stride.
    let share = excess / BINS as u32;
    let remainder = (excess % BINS as u32) as usize;
    for bin in histogram.iter_mut() {
        *bin += share;
    }
    if remainder > 0 {
        let stride = (BINS / remainder).max(1);
        for index in (0..BINS).step_by(stride).take(remainder) {
            histogram[index] += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut curve = [0u8; BINS];
    let mut cumulative = 0u32;
    for (level, count) in histogram.iter().enumerate() {
        cumulative += count;
        curve[level] = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    curve
}
