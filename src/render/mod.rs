//! Result Rendering
//!
//! Text panel and clipboard for the text grabber, canvas overlay for the
//! object detector.

pub mod boxes;
pub mod canvas;
pub mod clipboard;
pub mod text_panel;

pub use boxes::{draw_predictions, label_baseline, label_text};
pub use canvas::{load_label_font, Canvas, ImageCanvas};
pub use clipboard::{Clipboard, MemoryClipboard, SystemClipboard};
pub use text_panel::{CopyControl, TextPanel, COPIED_LABEL, COPY_CONFIRMATION, COPY_LABEL};
