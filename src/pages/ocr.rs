//! Text grabber page
//!
//! Selecting a file resets the result panel, shows a preview once the file is
//! read and runs recognition with live progress. The copy button puts the
//! panel text on the clipboard and briefly confirms.

use futures_util::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::ocr_status;
use crate::error::PipelineError;
use crate::intake::{PreviewImage, UploadedFile};
use crate::render::{Clipboard, TextPanel, COPIED_LABEL, COPY_CONFIRMATION, COPY_LABEL};
use crate::session::{Generation, PageState, RunTicket};
use crate::vision::{progress_channel, ProgressPhase, TextRecognizer, TextRegion, OCR_LANGUAGE};

/// Everything the text grabber displays
#[derive(Debug, Clone, Default)]
pub struct OcrView {
    pub state: PageState,
    pub status: String,
    pub preview: Option<PreviewImage>,
    pub panel: TextPanel,
    /// Recognised regions in reading order
    pub regions: Vec<TextRegion>,
}

/// Text grabber controller
#[derive(Clone)]
pub struct OcrPage {
    view: Arc<RwLock<OcrView>>,
    recognizer: Arc<dyn TextRecognizer>,
    clipboard: Arc<dyn Clipboard>,
    generation: Generation,
    status_tx: watch::Sender<String>,
}

impl OcrPage {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, clipboard: Arc<dyn Clipboard>) -> Self {
        let (status_tx, _) = watch::channel(String::new());
        Self {
            view: Arc::new(RwLock::new(OcrView::default())),
            recognizer,
            clipboard,
            generation: Generation::new(),
            status_tx,
        }
    }

    /// Snapshot of the current view
    pub fn view(&self) -> OcrView {
        self.view.read().clone()
    }

    /// Receive every status line as it is shown
    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.status_tx.subscribe()
    }

    /// Handle a file-selection event
    ///
    /// `None` is a no-op. Otherwise the panel is reset immediately and the
    /// returned task completes once the preview and recognition have settled.
    pub fn select_file(&self, file: Option<UploadedFile>) -> Option<JoinHandle<()>> {
        let file = file?;
        let ticket = self.generation.begin();
        debug!("Selected {} (run {})", file.name, ticket.id());

        {
            let mut view = self.view.write();
            view.panel.reset();
            view.regions.clear();
            view.preview = None;
            view.state = PageState::FileSelected;
        }
        self.set_status(ocr_status::PROCESSING, Some(PageState::Processing));

        let page = self.clone();
        Some(tokio::spawn(async move {
            tokio::join!(
                page.show_preview(&file, &ticket),
                page.recognize(&file, &ticket)
            );
        }))
    }

    /// Edit the result field as a user would
    pub fn edit_text(&self, text: &str) {
        self.view.write().panel.text = text.to_string();
    }

    /// Handle a click on the copy button
    ///
    /// On success the label reads "Copied!" until the returned task reverts
    /// it. Failures are only logged.
    pub async fn copy(&self) -> Option<JoinHandle<()>> {
        let text = {
            let view = self.view.read();
            if !view.panel.copy.enabled {
                return None;
            }
            view.panel.text.clone()
        };

        if let Err(e) = self.clipboard.write_text(&text).await {
            error!("Failed to copy text: {}", e);
            return None;
        }

        self.view.write().panel.copy.label = COPIED_LABEL;
        let view = self.view.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(COPY_CONFIRMATION).await;
            view.write().panel.copy.label = COPY_LABEL;
        }))
    }

    async fn show_preview(&self, file: &UploadedFile, ticket: &RunTicket) {
        match file.read_preview().await {
            Ok(preview) => {
                let mut view = self.view.write();
                if ticket.is_current() {
                    view.preview = Some(preview);
                }
            }
            Err(e) => warn!("Could not read {} for preview: {}", file.name, e),
        }
    }

    async fn recognize(&self, file: &UploadedFile, ticket: &RunTicket) {
        let (progress, mut events) = progress_channel();

        let report = async {
            while let Some(event) = events.next().await {
                debug!("{} ({}%)", event.phase.as_str(), event.percent());
                if event.phase == ProgressPhase::RecognizingText && ticket.is_current() {
                    self.set_status(&ocr_status::recognizing(event.percent()), None);
                }
            }
        };
        let work = async {
            tokio::select! {
                _ = ticket.cancelled() => Err(PipelineError::Cancelled),
                result = self.recognizer.recognize(file, OCR_LANGUAGE, progress) => result,
            }
        };
        let ((), outcome) = tokio::join!(report, work);

        let mut view = self.view.write();
        if !ticket.is_current() {
            debug!("Discarding result of superseded run {}", ticket.id());
            return;
        }

        match outcome {
            Ok(recognition) => {
                view.panel.show(&recognition.text);
                view.regions = recognition.regions;
                view.state = PageState::Done;
                view.status = ocr_status::DONE.to_string();
                self.status_tx.send_replace(view.status.clone());
            }
            Err(e) => {
                error!("{}", e);
                view.state = PageState::Error;
                view.status = ocr_status::ERROR.to_string();
                self.status_tx.send_replace(view.status.clone());
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineResult;
    use crate::intake::tests::png_upload;
    use crate::render::MemoryClipboard;
    use crate::vision::{ProgressSender, Recognition};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Returns canned text per file name, optionally held until released
    #[derive(Default)]
    struct ScriptedRecognizer {
        texts: HashMap<String, String>,
        progress: Vec<f32>,
        hold: Option<(String, Arc<Notify>)>,
    }

    #[async_trait]
    impl TextRecognizer for ScriptedRecognizer {
        async fn recognize(
            &self,
            file: &UploadedFile,
            language: &str,
            progress: ProgressSender,
        ) -> PipelineResult<Recognition> {
            assert_eq!(language, "eng");
            progress.report(ProgressPhase::DetectingText, 0.5);
            for &fraction in &self.progress {
                progress.report(ProgressPhase::RecognizingText, fraction);
            }
            if let Some((name, gate)) = &self.hold {
                if *name == file.name {
                    gate.notified().await;
                }
            }
            match self.texts.get(&file.name) {
                Some(text) => Ok(Recognition {
                    text: text.clone(),
                    regions: vec![TextRegion {
                        text: text.trim().to_string(),
                        bounds: (0, 0, file.name.len() as u32, 1),
                        confidence: 0.9,
                    }],
                }),
                None => Err(PipelineError::Recognition("engine exploded".to_string())),
            }
        }
    }

    struct BrokenClipboard;

    #[async_trait]
    impl Clipboard for BrokenClipboard {
        async fn write_text(&self, _text: &str) -> PipelineResult<()> {
            Err(PipelineError::Clipboard("denied".to_string()))
        }
    }

    fn recognizer(pairs: &[(&str, &str)]) -> ScriptedRecognizer {
        ScriptedRecognizer {
            texts: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    fn page(recognizer: ScriptedRecognizer) -> (OcrPage, MemoryClipboard) {
        let clipboard = MemoryClipboard::new();
        let page = OcrPage::new(Arc::new(recognizer), Arc::new(clipboard.clone()));
        (page, clipboard)
    }

    #[tokio::test]
    async fn test_no_file_is_noop() {
        let (page, _) = page(recognizer(&[]));
        assert!(page.select_file(None).is_none());

        let view = page.view();
        assert_eq!(view.state, PageState::Idle);
        assert!(view.status.is_empty());
    }

    #[tokio::test]
    async fn test_recognition_success() {
        let (page, _) = page(recognizer(&[("receipt.png", "TOTAL 12.50\n")]));

        let handle = page.select_file(Some(png_upload("receipt.png", 8, 6))).unwrap();
        assert_eq!(page.view().status, ocr_status::PROCESSING);
        assert_eq!(page.view().state, PageState::Processing);
        handle.await.unwrap();

        let view = page.view();
        assert_eq!(view.state, PageState::Done);
        assert_eq!(view.status, "Done! Text extracted below.");
        assert_eq!(view.panel.text, "TOTAL 12.50\n");
        assert!(view.panel.copy.enabled);
        assert_eq!(view.regions.len(), 1);
        assert_eq!(view.regions[0].text, "TOTAL 12.50");

        let preview = view.preview.unwrap();
        assert_eq!((preview.width, preview.height), (8, 6));
        assert!(preview.data_url.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_blank_result_keeps_copy_disabled() {
        let (page, clipboard) = page(recognizer(&[("blank.png", "  \n ")]));

        page.select_file(Some(png_upload("blank.png", 2, 2))).unwrap().await.unwrap();

        let view = page.view();
        assert_eq!(view.state, PageState::Done);
        assert!(!view.panel.copy.enabled);
        assert!(page.copy().await.is_none());
        assert_eq!(clipboard.read_text().await, "");
    }

    #[tokio::test]
    async fn test_engine_failure_sets_error_status() {
        let (page, _) = page(recognizer(&[]));

        page.select_file(Some(png_upload("x.png", 2, 2))).unwrap().await.unwrap();

        let view = page.view();
        assert_eq!(view.state, PageState::Error);
        assert_eq!(view.status, "Error: Could not process image. Please try again.");
        assert!(view.panel.text.is_empty());
        assert!(!view.panel.copy.enabled);
    }

    #[tokio::test]
    async fn test_progress_statuses_in_order() {
        let mut scripted = recognizer(&[("doc.png", "hi")]);
        scripted.progress = vec![0.0, 0.254, 0.5, 1.0];
        let (page, _) = page(scripted);
        let mut statuses = page.subscribe_status();

        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while statuses.changed().await.is_ok() {
                let status = statuses.borrow_and_update().clone();
                let done = status == ocr_status::DONE;
                seen.push(status);
                if done {
                    break;
                }
            }
            seen
        });
        tokio::task::yield_now().await;

        page.select_file(Some(png_upload("doc.png", 2, 2))).unwrap().await.unwrap();
        let seen = collector.await.unwrap();

        // A watch channel may coalesce intermediate values, so only check order
        let percents: Vec<u32> = seen
            .iter()
            .filter_map(|s| s.strip_prefix("Recognizing text... ("))
            .map(|s| s.trim_end_matches("%)").parse().unwrap())
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents.iter().all(|p| [0, 25, 50, 100].contains(p)));
        assert_eq!(seen.last().map(String::as_str), Some(ocr_status::DONE));
    }

    #[tokio::test]
    async fn test_new_selection_clears_previous_result() {
        let gate = Arc::new(Notify::new());
        let mut scripted = recognizer(&[("first.png", "first text"), ("second.png", "second text")]);
        scripted.hold = Some(("second.png".to_string(), gate.clone()));
        let (page, _) = page(scripted);

        page.select_file(Some(png_upload("first.png", 2, 2))).unwrap().await.unwrap();
        assert_eq!(page.view().panel.text, "first text");

        let handle = page.select_file(Some(png_upload("second.png", 3, 3))).unwrap();
        let view = page.view();
        assert!(view.panel.text.is_empty());
        assert!(!view.panel.copy.enabled);
        assert!(view.preview.is_none());
        assert!(view.regions.is_empty());

        gate.notify_one();
        handle.await.unwrap();
        assert_eq!(page.view().panel.text, "second text");
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let gate = Arc::new(Notify::new());
        let mut scripted = recognizer(&[("slow.png", "stale"), ("fast.png", "fresh")]);
        scripted.hold = Some(("slow.png".to_string(), gate.clone()));
        let (page, _) = page(scripted);

        let slow = page.select_file(Some(png_upload("slow.png", 5, 5))).unwrap();
        tokio::task::yield_now().await;
        let fast = page.select_file(Some(png_upload("fast.png", 4, 4))).unwrap();
        fast.await.unwrap();

        gate.notify_one();
        slow.await.unwrap();

        let view = page.view();
        assert_eq!(view.panel.text, "fresh");
        assert_eq!(view.state, PageState::Done);
        assert_eq!(view.preview.map(|p| p.width), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_confirmation_reverts_after_2000ms() {
        let (page, clipboard) = page(recognizer(&[("a.png", "copy me")]));
        page.select_file(Some(png_upload("a.png", 2, 2))).unwrap().await.unwrap();

        let start = tokio::time::Instant::now();
        let revert = page.copy().await.unwrap();
        assert_eq!(clipboard.read_text().await, "copy me");
        assert_eq!(page.view().panel.copy.label, "Copied!");

        revert.await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
        assert_eq!(page.view().panel.copy.label, "Copy Text");
    }

    #[tokio::test]
    async fn test_copy_uses_edited_field() {
        let (page, clipboard) = page(recognizer(&[("a.png", "orignal")]));
        page.select_file(Some(png_upload("a.png", 2, 2))).unwrap().await.unwrap();

        page.edit_text("original");
        page.copy().await.unwrap();
        assert_eq!(clipboard.read_text().await, "original");
    }

    #[tokio::test]
    async fn test_copy_failure_changes_nothing() {
        let page = OcrPage::new(
            Arc::new(recognizer(&[("a.png", "text")])),
            Arc::new(BrokenClipboard),
        );
        page.select_file(Some(png_upload("a.png", 2, 2))).unwrap().await.unwrap();
        let before = page.view();

        assert!(page.copy().await.is_none());
        let after = page.view();
        assert_eq!(after.panel, before.panel);
        assert_eq!(after.status, before.status);
    }
}
