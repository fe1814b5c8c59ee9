//! Object detection module
//!
//! Runs a YOLOv8-style ONNX export trained on COCO and turns its raw output
//! into an ordered list of predictions in source image pixels.

use async_trait::async_trait;
use image::DynamicImage;
use ndarray::{ArrayView2, Axis, Ix3};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::models::{load_session, ModelKind, ModelManager};
use super::preprocess::letterbox;
use crate::config::DetectionSettings;
use crate::error::{PipelineError, PipelineResult};

/// Axis-aligned box in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub bbox: BoundingBox,
    /// Class name
    pub label: String,
    /// Confidence score (0.0 - 1.0)
    pub score: f32,
}

/// An object detection model
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in a decoded image
    async fn detect(&self, image: &DynamicImage) -> PipelineResult<Vec<Prediction>>;
}

/// YOLOv8-style detector via ONNX Runtime
pub struct YoloDetector {
    session: Arc<Mutex<Session>>,
    settings: DetectionSettings,
}

impl YoloDetector {
    /// Ensure the model file is present and load it
    pub async fn load(
        manager: &ModelManager,
        settings: &DetectionSettings,
        use_gpu: bool,
    ) -> PipelineResult<Self> {
        let path = manager
            .ensure_model(ModelKind::ObjectDetection)
            .await
            .map_err(|e| PipelineError::ModelLoad(format!("{:#}", e)))?;

        let session = tokio::task::spawn_blocking(move || load_session(&path, use_gpu))
            .await
            .map_err(|e| PipelineError::ModelLoad(e.to_string()))?
            .map_err(|e| PipelineError::ModelLoad(format!("{:#}", e)))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            settings: settings.clone(),
        })
    }
}

#[async_trait]
impl ObjectDetector for YoloDetector {
    async fn detect(&self, image: &DynamicImage) -> PipelineResult<Vec<Prediction>> {
        let session = self.session.clone();
        let settings = self.settings.clone();
        let image = image.clone();

        tokio::task::spawn_blocking(move || -> PipelineResult<Vec<Prediction>> {
            let start = Instant::now();
            let input = letterbox(&image, settings.input_size);
            let tensor = Tensor::from_array(input.tensor.clone()).map_err(detection_error)?;

            let raw = {
                let mut session = session.lock();
                let outputs = session.run(ort::inputs![tensor]).map_err(detection_error)?;
                let output = outputs[0].try_extract_array::<f32>().map_err(detection_error)?;
                let output = output
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| PipelineError::Detection(e.to_string()))?;
                output.index_axis(Axis(0), 0).to_owned()
            };

            let predictions = decode_predictions(
                &raw.view(),
                &settings,
                |x, y| input.unmap(x, y),
                (image.width() as f32, image.height() as f32),
            );
            debug!("Detection complete in {:?}: {} objects", start.elapsed(), predictions.len());
            Ok(predictions)
        })
        .await
        .map_err(|e| PipelineError::Detection(e.to_string()))?
    }
}

fn detection_error(err: ort::Error) -> PipelineError {
    PipelineError::Detection(err.to_string())
}

/// Decode a `[4 + classes, anchors]` output matrix
///
/// Rows 0-3 hold centre x, centre y, width and height in model pixels; the
/// remaining rows hold per-class scores. `unmap` converts model pixels back to
/// source pixels; boxes are clamped to `image_size`. Results are suppressed
/// per class, ordered by descending score and truncated to `max_detections`.
pub fn decode_predictions<F>(
    output: &ArrayView2<'_, f32>,
    settings: &DetectionSettings,
    unmap: F,
    image_size: (f32, f32),
) -> Vec<Prediction>
where
    F: Fn(f32, f32) -> (f32, f32),
{
    let (rows, anchors) = output.dim();
    if rows <= 4 {
        return Vec::new();
    }

    let mut candidates: Vec<(usize, BoundingBox, f32)> = Vec::new();
    for a in 0..anchors {
        let (class, score) = (4..rows)
            .map(|r| (r - 4, output[[r, a]]))
            .fold((0, f32::NEG_INFINITY), |acc, c| if c.1 > acc.1 { c } else { acc });
        if score < settings.score_threshold {
            continue;
        }

        let (cx, cy, w, h) = (output[[0, a]], output[[1, a]], output[[2, a]], output[[3, a]]);
        let (x0, y0) = unmap(cx - w / 2.0, cy - h / 2.0);
        let (x1, y1) = unmap(cx + w / 2.0, cy + h / 2.0);
        let x0 = x0.clamp(0.0, image_size.0);
        let y0 = y0.clamp(0.0, image_size.1);
        let x1 = x1.clamp(0.0, image_size.0);
        let y1 = y1.clamp(0.0, image_size.1);
        if x1 <= x0 || y1 <= y0 {
            continue;
        }

        candidates.push((
            class,
            BoundingBox { x: x0, y: y0, width: x1 - x0, height: y1 - y0 },
            score,
        ));
    }

    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut kept: Vec<(usize, BoundingBox, f32)> = Vec::new();
    for candidate in candidates {
        if kept.len() >= settings.max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.0 == candidate.0 && k.1.iou(&candidate.1) > settings.iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept.into_iter()
        .map(|(class, bbox, score)| Prediction {
            bbox,
            label: coco_label(class).to_string(),
            score,
        })
        .collect()
}

/// COCO class name for a class index
pub fn coco_label(class: usize) -> &'static str {
    COCO_LABELS.get(class).copied().unwrap_or("unknown")
}

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];
