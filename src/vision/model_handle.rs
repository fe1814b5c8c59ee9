//! Shared detection model handle
//!
//! Initialised at most once per process and read by every detection after
//! that. A failed load is final: the handle stays `Failed` and detection is
//! unavailable until restart.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

use super::detection::ObjectDetector;
use crate::error::PipelineResult;

/// Load state of the model
#[derive(Clone, Default)]
pub enum ModelState {
    #[default]
    Unloaded,
    Loading,
    Ready(Arc<dyn ObjectDetector>),
    Failed(String),
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelState::Unloaded => write!(f, "Unloaded"),
            ModelState::Loading => write!(f, "Loading"),
            ModelState::Ready(_) => write!(f, "Ready"),
            ModelState::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

type LoadOutcome = Result<Arc<dyn ObjectDetector>, String>;

/// Init-once, read-many slot for the detection model
///
/// Callers arriving while a load is in flight wait for its outcome. A load
/// whose future is dropped before finishing leaves the handle unloaded.
#[derive(Clone, Default)]
pub struct ModelHandle {
    outcome: Arc<OnceCell<LoadOutcome>>,
    loading: Arc<AtomicBool>,
}

/// Clears the loading flag however the load future ends
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ModelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `load` if no initialisation has completed yet
    ///
    /// Returns whether the model is ready afterwards. Once a load finishes,
    /// later calls never reload, whatever its outcome.
    pub async fn initialize<F, Fut>(&self, load: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<Arc<dyn ObjectDetector>>>,
    {
        let outcome = self
            .outcome
            .get_or_init(|| async {
                let _loading = LoadingGuard::enter(&self.loading);
                match load().await {
                    Ok(model) => {
                        info!("Detection model ready");
                        Ok(model)
                    }
                    Err(e) => {
                        error!("Error loading model: {}", e);
                        Err(e.to_string())
                    }
                }
            })
            .await;

        outcome.is_ok()
    }

    /// The loaded model, if ready
    pub fn get(&self) -> Option<Arc<dyn ObjectDetector>> {
        match self.outcome.get() {
            Some(Ok(model)) => Some(model.clone()),
            _ => None,
        }
    }

    /// Snapshot of the load state
    pub fn state(&self) -> ModelState {
        match self.outcome.get() {
            Some(Ok(model)) => ModelState::Ready(model.clone()),
            Some(Err(reason)) => ModelState::Failed(reason.clone()),
            None if self.loading.load(Ordering::SeqCst) => ModelState::Loading,
            None => ModelState::Unloaded,
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").field("state", &self.state()).finish()
    }
}
