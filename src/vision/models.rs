//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the PaddleOCR and object
//! detection models.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::ModelSettings;

/// Model files the pipelines depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Text detection model (DBNet)
    TextDetection,
    /// Text recognition model (CRNN)
    TextRecognition,
    /// Character dictionary for recognition
    TextDictionary,
    /// Object detection model (YOLOv8-style export, COCO classes)
    ObjectDetection,
}

impl ModelKind {
    /// Every model the tool knows about
    pub const ALL: [ModelKind; 4] = [
        ModelKind::TextDetection,
        ModelKind::TextRecognition,
        ModelKind::TextDictionary,
        ModelKind::ObjectDetection,
    ];

    /// Models needed by the text grabber
    pub const OCR: [ModelKind; 3] = [
        ModelKind::TextDetection,
        ModelKind::TextRecognition,
        ModelKind::TextDictionary,
    ];

    /// Get the filename for this model
    pub fn filename(&self) -> &'static str {
        match self {
            ModelKind::TextDetection => "text_det.onnx",
            ModelKind::TextRecognition => "text_rec_en.onnx",
            ModelKind::TextDictionary => "text_dict_en.txt",
            ModelKind::ObjectDetection => "object_det.onnx",
        }
    }

    /// Built-in download URL, if the model has a canonical source
    /// Using PaddleOCR models from Hugging Face (monkt/paddleocr-onnx)
    pub fn default_url(&self) -> Option<&'static str> {
        match self {
            ModelKind::TextDetection => Some(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx",
            ),
            ModelKind::TextRecognition => Some(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx",
            ),
            ModelKind::TextDictionary => Some(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt",
            ),
            // Must be configured via models.detector_url
            ModelKind::ObjectDetection => None,
        }
    }

    /// Acceptable file size range for integrity check (in bytes)
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelKind::TextDetection => (2_000_000, 5_000_000),     // ~2.43 MB
            ModelKind::TextRecognition => (7_000_000, 10_000_000),  // ~7.83 MB
            ModelKind::TextDictionary => (500, 10_000),             // ~1.42 KB
            ModelKind::ObjectDetection => (1_000_000, 400_000_000), // yolov8n ~12 MB, x ~260 MB
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::TextDetection => "Text Detection",
            ModelKind::TextRecognition => "Text Recognition",
            ModelKind::TextDictionary => "Character Dictionary",
            ModelKind::ObjectDetection => "Object Detection",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix timestamp (seconds)
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Progress callback for download operations
pub type DownloadProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Availability of one model file
#[derive(Debug, Clone)]
pub struct ModelStatus {
    pub kind: ModelKind,
    pub available: bool,
    pub size_bytes: Option<u64>,
}

/// Model manager for downloading and caching ONNX models
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    offline: bool,
    detector_url: Option<String>,
}

impl ModelManager {
    /// Create a model manager from settings, defaulting to the data directory
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        let models_dir = match &settings.dir {
            Some(dir) => dir.clone(),
            None => crate::storage::default_models_dir()?,
        };
        let mut manager = Self::with_dir(models_dir)?;
        manager.offline = settings.offline;
        manager.detector_url = settings.detector_url.clone();
        Ok(manager)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            offline: false,
            detector_url: None,
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.filename())
    }

    /// Resolve the download URL, preferring configuration over the built-in one
    pub fn download_url(&self, kind: ModelKind) -> Option<String> {
        match kind {
            ModelKind::ObjectDetection => self.detector_url.clone(),
            _ => kind.default_url().map(str::to_string),
        }
    }

    /// Check if a model is already downloaded
    pub fn is_model_available(&self, kind: ModelKind) -> bool {
        let Ok(metadata) = std::fs::metadata(self.model_path(kind)) else {
            return false;
        };

        // Verify file size is reasonable
        let (min, max) = kind.expected_size_range();
        let size = metadata.len();
        size >= min && size <= max
    }

    /// Check if all text grabber models are available
    pub fn are_ocr_models_ready(&self) -> bool {
        ModelKind::OCR.iter().all(|&kind| self.is_model_available(kind))
    }

    /// Get status of all models
    pub fn model_status(&self) -> Vec<ModelStatus> {
        ModelKind::ALL
            .iter()
            .map(|&kind| ModelStatus {
                kind,
                available: self.is_model_available(kind),
                size_bytes: std::fs::metadata(self.model_path(kind)).ok().map(|m| m.len()),
            })
            .collect()
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub async fn ensure_model(&self, kind: ModelKind) -> Result<PathBuf> {
        self.ensure_model_with_progress(kind, None).await
    }

    /// Like [`ModelManager::ensure_model`], reporting download progress
    pub async fn ensure_model_with_progress(
        &self,
        kind: ModelKind,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<PathBuf> {
        let path = self.model_path(kind);

        if self.is_model_available(kind) {
            debug!("Model {:?} already available at {:?}", kind, path);
            return Ok(path);
        }

        info!("Downloading model {:?}...", kind);
        self.download_model_with_progress(kind, progress).await?;

        Ok(path)
    }

    /// Download every model that has a source, skipping ones already present
    pub async fn ensure_all_models(&self) -> Result<()> {
        for kind in ModelKind::OCR {
            self.ensure_model_with_progress(kind, Some(log_download_progress(kind)))
                .await?;
        }
        // The detector has no built-in source
        let detector = ModelKind::ObjectDetection;
        if let Err(e) = self
            .ensure_model_with_progress(detector, Some(log_download_progress(detector)))
            .await
        {
            warn!("Object detection model not downloaded: {:#}", e);
        }
        Ok(())
    }

    /// Download a specific model with optional progress callback
    pub async fn download_model_with_progress(
        &self,
        kind: ModelKind,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<()> {
        let path = self.model_path(kind);
        let Some(url) = self.download_url(kind) else {
            anyhow::bail!(
                "No download source for {} model. Set models.detector_url or place the file at {:?}",
                kind.display_name(),
                path
            );
        };

        if self.offline {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", kind.display_name(), url);
        let sha256 = download_file(&url, &path, progress).await?;

        if !self.is_model_available(kind) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.update_manifest_for_model(kind, sha256)?;

        info!("Successfully downloaded {} model", kind.display_name());
        Ok(())
    }

    /// Update manifest after successful download
    fn update_manifest_for_model(&self, kind: ModelKind, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let metadata = std::fs::metadata(self.model_path(kind))?;

        let model_info = ModelInfo {
            model: format!("{:?}", kind),
            filename: kind.filename().to_string(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        if let Some(existing) = manifest.models.iter_mut().find(|m| m.filename == model_info.filename) {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Log download progress in 10% steps
fn log_download_progress(kind: ModelKind) -> DownloadProgressCallback {
    let last_step = AtomicU64::new(u64::MAX);
    Box::new(move |downloaded, total| {
        let Some(total) = total.filter(|&t| t > 0) else {
            return;
        };
        let percent = (downloaded * 100 / total).min(100);
        if last_step.swap(percent / 10, Ordering::Relaxed) != percent / 10 {
            info!("{}: {}%", kind.display_name(), percent);
        }
    })
}

/// Stream a URL to `path` through a temp file; returns the SHA-256 hex digest
///
/// The temp file is removed if the download fails part way.
async fn download_file(
    url: &str,
    path: &Path,
    progress: Option<DownloadProgressCallback>,
) -> Result<String> {
    let temp_path = path.with_extension("tmp");

    match stream_to_file(url, &temp_path, progress).await {
        Ok(sha256) => {
            tokio::fs::rename(&temp_path, path)
                .await
                .context("Failed to move downloaded file to final location")?;
            Ok(sha256)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial download {:?}: {}", temp_path, cleanup);
                }
            }
            Err(e)
        }
    }
}

async fn stream_to_file(
    url: &str,
    temp_path: &Path,
    progress: Option<DownloadProgressCallback>,
) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300)) // 5 minute timeout
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let mut file = tokio::fs::File::create(temp_path)
        .await
        .context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;

        file.write_all(&chunk)
            .await
            .context("Failed to write to temp file")?;

        hasher.update(&chunk);
        downloaded += chunk.len() as u64;

        if let Some(ref callback) = progress {
            callback(downloaded, total_size);
        }
    }

    file.flush().await.context("Failed to flush temp file")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Build an ONNX Runtime session from a model file
pub fn load_session(model_path: &Path, use_gpu: bool) -> Result<Session> {
    info!("Loading ONNX model from {:?}", model_path);

    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?;

    let builder = if use_gpu {
        use ort::execution_providers::CUDAExecutionProvider;
        match builder.with_execution_providers([CUDAExecutionProvider::default().build()]) {
            Ok(builder) => builder,
            Err(e) => {
                warn!("GPU execution provider not available, using CPU: {}", e);
                Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .with_intra_threads(4)?
            }
        }
    } else {
        builder
    };

    let session = builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

    let input_names: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
    let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_filenames_are_distinct() {
        let mut names: Vec<_> = ModelKind::ALL.iter().map(|k| k.filename()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ModelKind::ALL.len());
    }

    #[test]
    fn test_detector_url_comes_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ModelSettings {
            dir: Some(dir.path().to_path_buf()),
            detector_url: Some("https://example.invalid/yolo.onnx".to_string()),
            ..Default::default()
        };
        let manager = ModelManager::from_settings(&settings).unwrap();

        assert_eq!(
            manager.download_url(ModelKind::ObjectDetection).as_deref(),
            Some("https://example.invalid/yolo.onnx")
        );
        assert!(manager.download_url(ModelKind::TextDetection).is_some());
    }

    #[test]
    fn test_model_availability_checks_size() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(!manager.is_model_available(ModelKind::TextDictionary));

        // Too small to be a real dictionary
        std::fs::write(manager.model_path(ModelKind::TextDictionary), "a\nb\n").unwrap();
        assert!(!manager.is_model_available(ModelKind::TextDictionary));

        std::fs::write(manager.model_path(ModelKind::TextDictionary), "x\n".repeat(400)).unwrap();
        assert!(manager.is_model_available(ModelKind::TextDictionary));
        assert!(!manager.are_ocr_models_ready());
    }

    #[test]
    fn test_model_status_lists_every_model() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        let status = manager.model_status();

        assert_eq!(status.len(), 4);
        assert!(status.iter().all(|s| !s.available && s.size_bytes.is_none()));
    }

    #[tokio::test]
    async fn test_offline_refuses_download() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ModelSettings {
            dir: Some(dir.path().to_path_buf()),
            offline: true,
            ..Default::default()
        };
        let manager = ModelManager::from_settings(&settings).unwrap();

        let err = manager.ensure_model(ModelKind::TextDetection).await.unwrap_err();
        assert!(err.to_string().contains("Offline mode"));
    }

    #[tokio::test]
    async fn test_detector_without_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();

        let err = manager.ensure_model(ModelKind::ObjectDetection).await.unwrap_err();
        assert!(err.to_string().contains("models.detector_url"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_manifest().unwrap().models.is_empty());

        let mut manifest = ModelManifest::default();
        manifest.models.push(ModelInfo {
            model: "TextDictionary".to_string(),
            filename: "text_dict_en.txt".to_string(),
            size_bytes: 1420,
            sha256: "abc".to_string(),
            downloaded_at: 1,
        });
        manager.save_manifest(&manifest).unwrap();

        let loaded = manager.load_manifest().unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].size_bytes, 1420);
    }

    #[tokio::test]
    async fn test_truncated_download_removes_temp_file() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            // Promise 4 KiB, deliver a few bytes, then hang up
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\npartial")
                .await;
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("text_det.onnx");
        let result = download_file(&format!("http://{}/det.onnx", addr), &path, None).await;

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_download_progress_logger_tolerates_unknown_size() {
        let callback = log_download_progress(ModelKind::TextDetection);
        callback(10, None);
        callback(10, Some(0));
        callback(50, Some(100));
        callback(100, Some(100));
    }
}
