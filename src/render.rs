//! Colour-mapped PNG rendering of aggregated grids.
//!
//! Layout: title strip on top, the grid upscaled by an integer factor, and a
//! vertical colour bar on the right with min/mid/max labels. Missing cells
//! are drawn in the background colour.

use crate::config::DisplayRange;
use crate::types::AodError;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use ndarray::Array2;
use rusttype::{Font, Scale};
use std::path::{Path, PathBuf};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([0, 0, 0]);

const MARGIN: u32 = 8;
const TITLE_HEIGHT: u32 = 28;
const BAR_GAP: u32 = 12;
const BAR_WIDTH: u32 = 16;
const LABEL_WIDTH: u32 = 52;

/// Viridis sampled at nine evenly spaced positions.
const VIRIDIS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [71, 44, 122],
    [59, 81, 139],
    [44, 113, 142],
    [33, 144, 141],
    [39, 173, 129],
    [92, 200, 99],
    [170, 220, 50],
    [253, 231, 37],
];

const FONT_CANDIDATES: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// Colour for a value under a fixed display range. Values outside the range
/// clamp to the end colours; NaN gets the background.
pub fn colormap(value: f32, range: DisplayRange) -> Rgb<u8> {
    if value.is_nan() {
        return BACKGROUND;
    }
    let t = ((value - range.min) / (range.max - range.min)).clamp(0.0, 1.0);
    let position = t * (VIRIDIS.len() - 1) as f32;
    let lower = (position.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = position - lower as f32;

    let a = VIRIDIS[lower];
    let b = VIRIDIS[lower + 1];
    let mix = |i: usize| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * frac).round() as u8;
    Rgb([mix(0), mix(1), mix(2)])
}

pub struct ImageRenderer {
    scale: u32,
    font: Option<Font<'static>>,
}

impl ImageRenderer {
    pub fn new(scale: u32, font_path: Option<&Path>) -> Self {
        let font = load_font(font_path);
        if font.is_none() {
            log::warn!("No TrueType font found; images will be rendered without text");
        }
        Self::with_font(scale, font)
    }

    pub fn with_font(scale: u32, font: Option<Font<'static>>) -> Self {
        Self {
            scale: scale.max(1),
            font,
        }
    }

    pub fn render(&self, grid: &Array2<f32>, range: DisplayRange, title: &str) -> RgbImage {
        let (rows, cols) = grid.dim();
        let map_w = cols as u32 * self.scale;
        let map_h = rows as u32 * self.scale;
        let width = MARGIN + map_w + BAR_GAP + BAR_WIDTH + LABEL_WIDTH + MARGIN;
        let height = TITLE_HEIGHT + map_h + MARGIN;

        let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

        for ((row, col), &value) in grid.indexed_iter() {
            let color = colormap(value, range);
            let x0 = MARGIN + col as u32 * self.scale;
            let y0 = TITLE_HEIGHT + row as u32 * self.scale;
            fill_rect(&mut img, x0, y0, self.scale, self.scale, color);
        }

        let bar_x = MARGIN + map_w + BAR_GAP;
        for dy in 0..map_h {
            // top of the bar is the range maximum
            let t = 1.0 - dy as f32 / (map_h.max(2) - 1) as f32;
            let value = range.min + t * (range.max - range.min);
            fill_rect(&mut img, bar_x, TITLE_HEIGHT + dy, BAR_WIDTH, 1, colormap(value, range));
        }

        if let Some(font) = &self.font {
            draw_text_mut(&mut img, INK, MARGIN as i32, 6, Scale::uniform(16.0), font, title);

            let label_x = (bar_x + BAR_WIDTH + 4) as i32;
            let mid = (range.min + range.max) / 2.0;
            let ticks = [
                (range.max, TITLE_HEIGHT as i32),
                (mid, (TITLE_HEIGHT + map_h / 2) as i32 - 5),
                (range.min, (TITLE_HEIGHT + map_h) as i32 - 11),
            ];
            for (value, y) in ticks {
                let text = format!("{:.2}", value);
                draw_text_mut(&mut img, INK, label_x, y, Scale::uniform(11.0), font, &text);
            }
        }

        img
    }

    pub fn write_png(
        &self,
        grid: &Array2<f32>,
        range: DisplayRange,
        title: &str,
        path: &Path,
    ) -> Result<(), AodError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.render(grid, range, title).save(path)?;
        Ok(())
    }
}

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
    for y in y0..(y0 + h).min(img.height()) {
        for x in x0..(x0 + w).min(img.width()) {
            img.put_pixel(x, y, color);
        }
    }
}

fn load_font(configured: Option<&Path>) -> Option<Font<'static>> {
    let candidates = configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain(FONT_CANDIDATES.iter().map(PathBuf::from));

    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match Font::try_from_vec(bytes) {
            Some(font) => {
                log::debug!("Using font {}", path.display());
                return Some(font);
            }
            None => log::warn!("{} is not a usable TrueType font", path.display()),
        }
    }
    None
}
