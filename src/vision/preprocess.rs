//! Image preprocessing for the ONNX models
//!
//! Handles image resizing, normalization, and tensor conversion for the
//! PaddleOCR models and the letterboxed object detector input.

use image::{imageops, imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ndarray::{Array3, Array4};

/// Normalisation used by the PaddleOCR detection model (ImageNet statistics)
pub const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalisation used by the recognition model: maps [0, 1] -> [-1, 1]
pub const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Recognition input height
pub const REC_HEIGHT: u32 = 48;
/// Widest recognition input accepted
pub const REC_MAX_WIDTH: u32 = 640;

/// Convert an RGB image to an HWC f32 array scaled to 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let mut normalized = image.clone();
    for ((_, _, c), value) in normalized.indexed_iter_mut() {
        *value = (*value - mean[c]) / std[c];
    }
    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    Array4::from_shape_fn((1, c, h, w), |(_, ch, y, x)| image[[y, x, ch]])
}

/// Detection input and the scale applied to reach it
#[derive(Debug)]
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    /// Resized pixels per source pixel
    pub scale: f32,
}

/// Resize so the longest side is `target_size`, pad to multiples of 32
/// (required by DBNet), normalise and convert to NCHW
pub fn prepare_text_detection(image: &RgbImage, target_size: u32) -> DetectionInput {
    let (w, h) = image.dimensions();
    let scale = target_size as f32 / w.max(h) as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    let padded_w = new_w.div_ceil(32) * 32;
    let padded_h = new_h.div_ceil(32) * 32;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::new(padded_w, padded_h);
    imageops::replace(&mut canvas, &resized, 0, 0);

    let normalized = normalize(&rgb_to_f32(&canvas), &DET_MEAN, &DET_STD);
    DetectionInput {
        tensor: hwc_to_nchw(&normalized),
        scale,
    }
}

/// Resize a text line crop to the recognition height (variable width)
pub fn prepare_text_recognition(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let scale = REC_HEIGHT as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).ceil() as u32).clamp(1, REC_MAX_WIDTH);

    let resized = imageops::resize(crop, new_w, REC_HEIGHT, FilterType::Triangle);
    let normalized = normalize(&rgb_to_f32(&resized), &REC_MEAN, &REC_STD);
    hwc_to_nchw(&normalized)
}

/// Crop an axis-aligned region, clamped to the image
pub fn crop_region(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    let (img_w, img_h) = image.dimensions();
    let x = x.min(img_w.saturating_sub(1));
    let y = y.min(img_h.saturating_sub(1));
    let width = width.clamp(1, img_w - x);
    let height = height.clamp(1, img_h - y);

    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Letterboxed detector input
#[derive(Debug)]
pub struct Letterbox {
    pub tensor: Array4<f32>,
    /// Model pixels per source pixel
    pub scale: f32,
    /// Horizontal and vertical padding in model pixels
    pub pad: (f32, f32),
}

impl Letterbox {
    /// Map a model-space coordinate back to the source image
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad.0) / self.scale, (y - self.pad.1) / self.scale)
    }
}

/// Fit the image into a square of `size`, centred on gray padding, scaled to 0-1
pub fn letterbox(image: &DynamicImage, size: u32) -> Letterbox {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let scale = size as f32 / w.max(h) as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(&rgb, new_w, new_h, FilterType::Triangle);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([114, 114, 114]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Letterbox {
        tensor: hwc_to_nchw(&rgb_to_f32(&canvas)),
        scale,
        pad: (pad_x as f32, pad_y as f32),
    }
}
