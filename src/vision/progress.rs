//! Engine progress reporting
//!
//! Engines push progress into a channel; callers consume it as a finite
//! stream that ends when the engine drops its sender.

use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Stage an engine is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    /// Model weights are being loaded
    LoadingModel,
    /// Text regions are being located
    DetectingText,
    /// Located regions are being read
    RecognizingText,
}

impl ProgressPhase {
    /// Status label for the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressPhase::LoadingModel => "loading model",
            ProgressPhase::DetectingText => "detecting text",
            ProgressPhase::RecognizingText => "recognizing text",
        }
    }
}

/// One progress report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    /// Completed fraction of the phase (0.0 - 1.0)
    pub fraction: f32,
}

impl ProgressEvent {
    /// Completion as a whole percentage
    pub fn percent(&self) -> u8 {
        (self.fraction.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// Create a connected sender/stream pair
pub fn progress_channel() -> (ProgressSender, ProgressStream) {
    let (tx, rx) = unbounded_channel();
    (ProgressSender { tx }, ProgressStream { rx })
}

/// Producer side, handed to an engine
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    /// Report progress; a dropped consumer is ignored
    pub fn report(&self, phase: ProgressPhase, fraction: f32) {
        let _ = self.tx.send(ProgressEvent { phase, fraction });
    }
}

/// Consumer side
#[derive(Debug)]
pub struct ProgressStream {
    rx: UnboundedReceiver<ProgressEvent>,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_percent_rounding() {
        let event = |fraction| ProgressEvent { phase: ProgressPhase::RecognizingText, fraction };

        assert_eq!(event(0.0).percent(), 0);
        assert_eq!(event(0.004).percent(), 0);
        assert_eq!(event(0.006).percent(), 1);
        assert_eq!(event(0.424).percent(), 42);
        assert_eq!(event(0.995).percent(), 100);
        assert_eq!(event(1.0).percent(), 100);
    }

    #[test]
    fn test_percent_monotonic() {
        let mut last = 0;
        for step in 0..=1000 {
            let pct = ProgressEvent {
                phase: ProgressPhase::RecognizingText,
                fraction: step as f32 / 1000.0,
            }
            .percent();
            assert!(pct >= last);
            last = pct;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let (tx, stream) = progress_channel();
        tx.report(ProgressPhase::DetectingText, 1.0);
        tx.report(ProgressPhase::RecognizingText, 0.5);
        drop(tx);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].phase, ProgressPhase::RecognizingText);
        assert_eq!(events[1].percent(), 50);
    }
}
