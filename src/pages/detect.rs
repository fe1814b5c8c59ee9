//! Object detector page
//!
//! The model is loaded once when the page starts. Each selected image is
//! drawn as the canvas base layer, then detections are outlined on top.

use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::detect_status;
use crate::error::{PipelineError, PipelineResult};
use crate::intake::UploadedFile;
use crate::render::{draw_predictions, Canvas};
use crate::session::{Generation, PageState};
use crate::vision::{ModelHandle, ObjectDetector, Prediction};

/// What the detector page displays besides the canvas
#[derive(Debug, Clone, Default)]
pub struct DetectionView {
    pub state: PageState,
    pub status: String,
}

/// Object detector controller
pub struct DetectionPage<C: Canvas + 'static> {
    view: Arc<RwLock<DetectionView>>,
    canvas: Arc<Mutex<C>>,
    model: ModelHandle,
    generation: Generation,
    status_tx: watch::Sender<String>,
}

impl<C: Canvas + 'static> Clone for DetectionPage<C> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            canvas: self.canvas.clone(),
            model: self.model.clone(),
            generation: self.generation.clone(),
            status_tx: self.status_tx.clone(),
        }
    }
}

impl<C: Canvas + 'static> DetectionPage<C> {
    pub fn new(canvas: C, model: ModelHandle) -> Self {
        let (status_tx, _) = watch::channel(String::new());
        Self {
            view: Arc::new(RwLock::new(DetectionView::default())),
            canvas: Arc::new(Mutex::new(canvas)),
            model,
            generation: Generation::new(),
            status_tx,
        }
    }

    /// Snapshot of the current view
    pub fn view(&self) -> DetectionView {
        self.view.read().clone()
    }

    /// Receive every status line as it is shown
    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.status_tx.subscribe()
    }

    /// Inspect the canvas
    pub fn with_canvas<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(&self.canvas.lock())
    }

    /// Load the detection model into the shared handle
    ///
    /// Only the first completed load on a handle counts; pages sharing a
    /// handle that is still loading wait for it. Returns whether the model is
    /// ready.
    pub async fn load_model<F, Fut>(&self, load: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<Arc<dyn ObjectDetector>>>,
    {
        self.set_status(detect_status::LOADING_MODEL, None);
        let ready = self.model.initialize(load).await;

        if ready {
            self.set_status(detect_status::MODEL_LOADED, None);
        } else {
            warn!("Detection unavailable: {:?}", self.model.state());
            self.set_status(detect_status::MODEL_ERROR, None);
        }
        ready
    }

    /// Handle a file-selection event
    ///
    /// A no-op without a file or before the model is ready. The returned
    /// task yields the predictions that were drawn, or `None` if the run
    /// failed or was superseded.
    pub fn select_file(
        &self,
        file: Option<UploadedFile>,
    ) -> Option<JoinHandle<Option<Vec<Prediction>>>> {
        let file = file?;
        let model = self.model.get()?;

        let ticket = self.generation.begin();
        debug!("Selected {} (run {})", file.name, ticket.id());

        self.canvas.lock().clear();
        self.view.write().state = PageState::FileSelected;

        let page = self.clone();
        Some(tokio::spawn(async move {
            let image = match file.decode_async().await {
                Ok(image) => image,
                Err(e) => {
                    warn!("Could not read {}: {}", file.name, e);
                    return None;
                }
            };

            {
                let mut canvas = page.canvas.lock();
                if !ticket.is_current() {
                    return None;
                }
                canvas.resize(image.width(), image.height());
                canvas.draw_image(&image.to_rgba8());
                canvas.set_visible(true);
            }
            page.set_status(detect_status::DETECTING, Some(PageState::Processing));

            let outcome = tokio::select! {
                _ = ticket.cancelled() => Err(PipelineError::Cancelled),
                result = model.detect(&image) => result,
            };

            let mut canvas = page.canvas.lock();
            if !ticket.is_current() {
                debug!("Discarding result of superseded run {}", ticket.id());
                return None;
            }

            match outcome {
                Ok(predictions) => {
                    page.set_status(&detect_status::found(predictions.len()), Some(PageState::Done));
                    draw_predictions(&mut *canvas, &predictions);
                    Some(predictions)
                }
                Err(e) => {
                    error!("Error during detection: {}", e);
                    page.set_status(detect_status::ERROR, Some(PageState::Error));
                    None
                }
            }
        }))
    }

    fn set_status(&self, status: &str, state: Option<PageState>) {
        let mut view = self.view.write();
        view.status = status.to_string();
        if let Some(state) = state {
            view.state = state;
        }
        self.status_tx.send_replace(view.status.clone());
    }
}
