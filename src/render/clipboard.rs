//! Clipboard access
//!
//! `SystemClipboard` talks to the OS clipboard; `MemoryClipboard` keeps the
//! text in-process for headless runs and tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{PipelineError, PipelineResult};

/// Asynchronous text clipboard
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Replace the clipboard contents with `text`
    async fn write_text(&self, text: &str) -> PipelineResult<()>;
}

/// The operating system clipboard
///
/// The arboard handle is created on first write and kept for the life of the
/// value. On X11 and Wayland the owning handle serves the contents, and
/// dropping it hands them to the clipboard manager.
#[derive(Default, Clone)]
pub struct SystemClipboard {
    owner: Arc<parking_lot::Mutex<Option<arboard::Clipboard>>>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn write_text(&self, text: &str) -> PipelineResult<()> {
        let text = text.to_string();
        let owner = self.owner.clone();
        tokio::task::spawn_blocking(move || {
            let mut owner = owner.lock();
            if owner.is_none() {
                let clipboard = arboard::Clipboard::new()
                    .map_err(|e| PipelineError::Clipboard(e.to_string()))?;
                *owner = Some(clipboard);
            }
            match owner.as_mut() {
                Some(clipboard) => clipboard
                    .set_text(text)
                    .map_err(|e| PipelineError::Clipboard(e.to_string())),
                None => Err(PipelineError::Clipboard("clipboard unavailable".to_string())),
            }
        })
        .await
        .map_err(|e| PipelineError::Clipboard(e.to_string()))?
    }
}

/// In-process clipboard
#[derive(Debug, Default, Clone)]
pub struct MemoryClipboard {
    contents: Arc<Mutex<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents
    pub async fn read_text(&self) -> String {
        self.contents.lock().await.clone()
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn write_text(&self, text: &str) -> PipelineResult<()> {
        *self.contents.lock().await = text.to_string();
        Ok(())
    }
}
