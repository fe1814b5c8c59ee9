//! Vision Layer
//!
//! Text extraction and object detection on selected images. Both engines run
//! ONNX models through ONNX Runtime:
//! - PaddleOCR (DBNet + CRNN) for text
//! - YOLOv8-style COCO detector for objects

pub mod detection;
pub mod model_handle;
pub mod models;
pub mod ocr;
pub mod preprocess;
pub mod progress;

pub use detection::{BoundingBox, ObjectDetector, Prediction, YoloDetector};
pub use model_handle::{ModelHandle, ModelState};
pub use models::{ModelKind, ModelManager};
pub use ocr::{PaddleOcr, Recognition, TextRecognizer, OCR_LANGUAGE};
pub use progress::{progress_channel, ProgressEvent, ProgressPhase, ProgressSender, ProgressStream};

/// Detected text region from OCR
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TextRegion {
    /// Detected text content
    pub text: String,
    /// Bounding box (x, y, width, height)
    pub bounds: (u32, u32, u32, u32),
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
}
