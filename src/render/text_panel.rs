//! Recognized text panel
//!
//! Editable result field plus its copy button.

use std::time::Duration;

/// Copy button label at rest
pub const COPY_LABEL: &str = "Copy Text";
/// Copy button label after a successful copy
pub const COPIED_LABEL: &str = "Copied!";
/// How long the confirmation label stays up
pub const COPY_CONFIRMATION: Duration = Duration::from_millis(2000);

/// State of the copy button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyControl {
    pub label: &'static str,
    pub enabled: bool,
}

impl Default for CopyControl {
    fn default() -> Self {
        Self {
            label: COPY_LABEL,
            enabled: false,
        }
    }
}

/// Result text field and copy button
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextPanel {
    /// Field contents; the user may edit them after recognition
    pub text: String,
    pub copy: CopyControl,
}

impl TextPanel {
    /// Empty the field and disable copying
    pub fn reset(&mut self) {
        self.text.clear();
        self.copy = CopyControl::default();
    }

    /// Show recognized text verbatim; copying is enabled only for non-blank text
    pub fn show(&mut self, text: &str) {
        self.text = text.to_string();
        if !text.trim().is_empty() {
            self.copy.enabled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_enables_copy_for_text() {
        let mut panel = TextPanel::default();
        panel.show("  Invoice #42\n");

        assert_eq!(panel.text, "  Invoice #42\n");
        assert!(panel.copy.enabled);
    }

    #[test]
    fn test_whitespace_keeps_copy_disabled() {
        for text in ["", "   ", "\n\t \n"] {
            let mut panel = TextPanel::default();
            panel.show(text);
            assert_eq!(panel.text, text);
            assert!(!panel.copy.enabled, "copy enabled for {:?}", text);
        }
    }

    #[test]
    fn test_reset() {
        let mut panel = TextPanel::default();
        panel.show("hello");
        panel.copy.label = COPIED_LABEL;

        panel.reset();
        assert_eq!(panel, TextPanel::default());
        assert_eq!(panel.copy.label, COPY_LABEL);
    }
}
