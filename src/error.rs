//! Pipeline error types
//!
//! Errors raised by file intake, the inference engines and the renderers.
//! Page handlers catch all of these; none propagate past a page.

use thiserror::Error;

/// Errors produced while moving a file through a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The selected file is not a recognised image format
    #[error("unsupported file: {0}")]
    UnsupportedFile(String),

    /// Image bytes could not be decoded
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// Filesystem failure while reading input or models
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The OCR engine failed
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// The detection model failed during inference
    #[error("object detection failed: {0}")]
    Detection(String),

    /// A model could not be downloaded or loaded
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Detection requested before the model handle is ready
    #[error("detection model is not available")]
    ModelUnavailable,

    /// No recognition model exists for the requested language
    #[error("unsupported OCR language: {0}")]
    UnsupportedLanguage(String),

    /// Clipboard write failed
    #[error("clipboard error: {0}")]
    Clipboard(String),

    /// A newer selection superseded this run
    #[error("run was superseded by a newer selection")]
    Cancelled,
}

/// Result alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::UnsupportedLanguage("deu".to_string());
        assert_eq!(err.to_string(), "unsupported OCR language: deu");

        let err = PipelineError::ModelUnavailable;
        assert_eq!(err.to_string(), "detection model is not available");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
