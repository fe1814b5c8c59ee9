//! Application Coordinator
//!
//! Builds both pages from configuration: wires the ONNX engines, the model
//! manager, the clipboard and the canvas into page controllers.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::intake::UploadedFile;
use crate::pages::{DetectionPage, OcrPage};
use crate::render::{load_label_font, Clipboard, ImageCanvas};
use crate::vision::{
    ModelHandle, ModelManager, ObjectDetector, PaddleOcr, ProgressPhase, ProgressSender,
    Recognition, TextRecognizer, YoloDetector,
};

/// Main application coordinator
pub struct PixelScribeApp {
    config: AppConfig,
    models: ModelManager,
    /// Detection model shared by every detection page of this process
    detector: ModelHandle,
}

impl PixelScribeApp {
    /// Create a coordinator; resolves (and creates) the models directory
    pub fn new(config: AppConfig) -> Result<Self> {
        let models = ModelManager::from_settings(&config.models)?;
        info!("Models directory: {:?}", models.models_dir());

        Ok(Self {
            config,
            models,
            detector: ModelHandle::new(),
        })
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    /// Text grabber page backed by PaddleOCR
    pub fn ocr_page(&self, clipboard: Arc<dyn Clipboard>) -> OcrPage {
        let recognizer = ManagedPaddleOcr {
            models: self.models.clone(),
            config: self.config.clone(),
            engine: OnceCell::new(),
        };
        OcrPage::new(Arc::new(recognizer), clipboard)
    }

    /// Object detector page drawing onto an image canvas
    ///
    /// The caller starts the model load with [`PixelScribeApp::load_detector`].
    pub fn detection_page(&self) -> DetectionPage<ImageCanvas> {
        let font = load_label_font(self.config.render.font_path.as_deref());
        DetectionPage::new(ImageCanvas::new(font), self.detector.clone())
    }

    /// Load the detection model into the shared handle, updating the page status
    pub async fn load_detector(&self, page: &DetectionPage<ImageCanvas>) -> bool {
        let models = self.models.clone();
        let settings = self.config.detection.clone();
        let use_gpu = self.config.models.use_gpu;

        page.load_model(move || async move {
            let detector = YoloDetector::load(&models, &settings, use_gpu).await?;
            Ok(Arc::new(detector) as Arc<dyn ObjectDetector>)
        })
        .await
    }

    /// Default output path for an annotated image
    pub fn annotated_path(input: &std::path::Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        input.with_file_name(format!("{}.detected.png", stem))
    }
}

/// PaddleOCR loaded on first use
///
/// Model download and session creation happen inside the first recognition,
/// so a load failure surfaces as a recognition failure. A failed load is
/// retried on the next file.
struct ManagedPaddleOcr {
    models: ModelManager,
    config: AppConfig,
    engine: OnceCell<PaddleOcr>,
}

#[async_trait]
impl TextRecognizer for ManagedPaddleOcr {
    async fn recognize(
        &self,
        file: &UploadedFile,
        language: &str,
        progress: ProgressSender,
    ) -> PipelineResult<Recognition> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                progress.report(ProgressPhase::LoadingModel, 0.0);
                let engine = PaddleOcr::load(
                    &self.models,
                    &self.config.ocr,
                    self.config.models.use_gpu,
                    &progress,
                )
                .await
                        .map_err(|e| PipelineError::ModelLoad(format!("{:#}", e)))?;
                progress.report(ProgressPhase::LoadingModel, 1.0);
                Ok::<_, PipelineError>(engine)
            })
            .await?;

        engine.recognize(file, language, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSettings;
    use crate::intake::tests::png_upload;
    use crate::render::MemoryClipboard;
    use crate::session::PageState;

    fn offline_app(dir: &std::path::Path) -> PixelScribeApp {
        let config = AppConfig {
            models: ModelSettings {
                dir: Some(dir.to_path_buf()),
                offline: true,
                ..Default::default()
            },
            ..Default::default()
        };
        PixelScribeApp::new(config).unwrap()
    }

    #[test]
    fn test_annotated_path() {
        let path = PixelScribeApp::annotated_path(std::path::Path::new("/tmp/shots/street.jpg"));
        assert_eq!(path, PathBuf::from("/tmp/shots/street.detected.png"));
    }

    #[tokio::test]
    async fn test_missing_ocr_models_surface_as_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = offline_app(dir.path());
        let page = app.ocr_page(Arc::new(MemoryClipboard::new()));

        page.select_file(Some(png_upload("a.png", 3, 3))).unwrap().await.unwrap();

        let view = page.view();
        assert_eq!(view.state, PageState::Error);
        assert_eq!(view.status, "Error: Could not process image. Please try again.");
    }

    #[tokio::test]
    async fn test_missing_detector_model_disables_detection() {
        let dir = tempfile::tempdir().unwrap();
        let app = offline_app(dir.path());
        let page = app.detection_page();

        assert!(!app.load_detector(&page).await);
        assert_eq!(page.view().status, "Error: Could not load AI model.");
        assert!(page.select_file(Some(png_upload("a.png", 3, 3))).is_none());
    }
}
