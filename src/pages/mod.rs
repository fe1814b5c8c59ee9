//! Pages
//!
//! Each page wires FileIntake -> engine -> renderer for one pipeline and owns
//! the view state a front end displays. Pages are cheap to clone; clones share
//! state.

pub mod detect;
pub mod ocr;

pub use detect::{DetectionPage, DetectionView};
pub use ocr::{OcrPage, OcrView};

/// Text grabber status messages
pub mod ocr_status {
    pub const PROCESSING: &str = "Processing... This may take a moment.";
    pub const DONE: &str = "Done! Text extracted below.";
    pub const ERROR: &str = "Error: Could not process image. Please try again.";

    pub fn recognizing(percent: u8) -> String {
        format!("Recognizing text... ({}%)", percent)
    }
}

/// Object detector status messages
pub mod detect_status {
    pub const LOADING_MODEL: &str = "Loading AI model... (This may take a moment)";
    pub const MODEL_LOADED: &str = "Model loaded. Please upload an image.";
    pub const MODEL_ERROR: &str = "Error: Could not load AI model.";
    pub const DETECTING: &str = "Detecting objects...";
    pub const ERROR: &str = "Error: Could not detect objects.";

    pub fn found(count: usize) -> String {
        format!("Found {} objects.", count)
    }
}
