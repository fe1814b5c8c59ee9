//! Drawing surface for detection results
//!
//! `Canvas` mirrors the handful of 2D operations the detection page needs.
//! `ImageCanvas` rasterises them onto an RGBA buffer.

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use anyhow::{Context, Result};
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::vision::BoundingBox;

/// Stroke/fill colour for boxes and labels (#00FFFF)
pub const OVERLAY_COLOR: Rgba<u8> = Rgba([0, 255, 255, 255]);
/// Box outline width in pixels
pub const LINE_WIDTH: u32 = 2;
/// Label font size in pixels
pub const FONT_SIZE: f32 = 18.0;

/// 2D drawing operations used by the detection renderer
pub trait Canvas: Send {
    /// Erase all pixels
    fn clear(&mut self);

    /// Set the pixel dimensions (erases contents)
    fn resize(&mut self, width: u32, height: u32);

    /// Draw an image with its top-left corner at the origin
    fn draw_image(&mut self, image: &RgbaImage);

    /// Outline a rectangle
    fn stroke_rect(&mut self, rect: &BoundingBox, color: Rgba<u8>, line_width: u32);

    /// Fill text whose baseline starts at (x, baseline)
    fn fill_text(&mut self, text: &str, x: f32, baseline: f32, color: Rgba<u8>, size: f32);

    /// Show or hide the canvas
    fn set_visible(&mut self, visible: bool);
}

/// Canvas backed by an in-memory RGBA image
pub struct ImageCanvas {
    buffer: RgbaImage,
    font: Option<FontArc>,
    visible: bool,
}

impl ImageCanvas {
    /// Create an empty, hidden canvas
    pub fn new(font: Option<FontArc>) -> Self {
        Self {
            buffer: RgbaImage::new(0, 0),
            font,
            visible: false,
        }
    }

    /// Write the canvas to an image file (format from extension)
    ///
    /// A hidden canvas has nothing worth saving and is rejected.
    pub fn save(&self, path: &Path) -> Result<()> {
        if !self.visible {
            anyhow::bail!("Canvas is hidden; no image has been drawn");
        }
        self.buffer
            .save(path)
            .with_context(|| format!("Failed to save canvas to {:?}", path))
    }
}

impl Canvas for ImageCanvas {
    fn clear(&mut self) {
        for pixel in self.buffer.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.buffer = RgbaImage::new(width, height);
    }

    fn draw_image(&mut self, image: &RgbaImage) {
        imageops::overlay(&mut self.buffer, image, 0, 0);
    }

    fn stroke_rect(&mut self, rect: &BoundingBox, color: Rgba<u8>, line_width: u32) {
        // The stroke straddles the path, like a 2D context stroke
        let x = rect.x.round() as i32;
        let y = rect.y.round() as i32;
        let w = rect.width.round().max(1.0) as u32;
        let h = rect.height.round().max(1.0) as u32;
        let half = (line_width / 2) as i32;

        for i in 0..line_width.max(1) as i32 {
            let inset = i - half;
            let rw = (w as i32 - 2 * inset).max(1) as u32;
            let rh = (h as i32 - 2 * inset).max(1) as u32;
            draw_hollow_rect_mut(&mut self.buffer, Rect::at(x + inset, y + inset).of_size(rw, rh), color);
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, baseline: f32, color: Rgba<u8>, size: f32) {
        let Some(font) = &self.font else {
            debug!("No label font loaded, skipping label {:?}", text);
            return;
        };
        let scale = PxScale::from(size);
        let top = baseline - font.as_scaled(scale).ascent();
        draw_text_mut(
            &mut self.buffer,
            color,
            x.round() as i32,
            top.round() as i32,
            scale,
            font,
            text,
        );
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}

/// Fonts tried when no font path is configured
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Load the label font from the configured path or a known system location
pub fn load_label_font(configured: Option<&Path>) -> Option<FontArc> {
    let candidates: Vec<PathBuf> = match configured {
        Some(path) => vec![path.to_path_buf()],
        None => SYSTEM_FONTS.iter().map(PathBuf::from).collect(),
    };

    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontArc::try_from_vec(bytes) {
            Ok(font) => {
                debug!("Using label font {:?}", path);
                return Some(font);
            }
            Err(e) => warn!("Invalid font file {:?}: {}", path, e),
        }
    }

    warn!("No usable label font found; detection labels will not be drawn");
    None
}

/// Canvas that records operations instead of drawing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    pub ops: Vec<DrawOp>,
    pub size: (u32, u32),
    pub visible: bool,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear,
    Resize(u32, u32),
    Image(u32, u32),
    Rect(BoundingBox, u32),
    Text(String, f32, f32),
}

#[cfg(test)]
impl RecordingCanvas {
    pub fn rects(&self) -> Vec<BoundingBox> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Rect(rect, _) => Some(*rect),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<(String, f32, f32)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text(text, x, y) => Some((text.clone(), *x, *y)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl Canvas for RecordingCanvas {
    fn clear(&mut self) {
        self.ops.push(DrawOp::Clear);
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.ops.push(DrawOp::Resize(width, height));
    }

    fn draw_image(&mut self, image: &RgbaImage) {
        self.ops.push(DrawOp::Image(image.width(), image.height()));
    }

    fn stroke_rect(&mut self, rect: &BoundingBox, _color: Rgba<u8>, line_width: u32) {
        self.ops.push(DrawOp::Rect(*rect, line_width));
    }

    fn fill_text(&mut self, text: &str, x: f32, baseline: f32, _color: Rgba<u8>, _size: f32) {
        self.ops.push(DrawOp::Text(text.to_string(), x, baseline));
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}
