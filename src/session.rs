//! Run generations
//!
//! Every file selection starts a new generation. Starting one cancels the
//! previous run and makes its ticket stale, so a late result from a
//! superseded engine call can never overwrite newer UI state.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageState {
    /// Nothing selected yet
    #[default]
    Idle,
    /// A file was chosen and UI state was reset
    FileSelected,
    /// The engine is working on the file
    Processing,
    /// Result rendered
    Done,
    /// The engine failed
    Error,
}

#[derive(Debug, Default)]
struct GenerationInner {
    counter: AtomicU64,
    current: Mutex<Option<CancellationToken>>,
}

/// Generation counter shared by all runs of one page
#[derive(Debug, Clone, Default)]
pub struct Generation {
    inner: Arc<GenerationInner>,
}

impl Generation {
    /// Create a counter with no run in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Supersede any in-flight run and start a new one
    pub fn begin(&self) -> RunTicket {
        let token = CancellationToken::new();
        // Id and token are swapped together so the newest id always owns the live token
        let id = {
            let mut current = self.inner.current.lock();
            if let Some(previous) = current.replace(token.clone()) {
                previous.cancel();
            }
            self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1
        };

        RunTicket {
            id,
            token,
            inner: self.inner.clone(),
        }
    }
}

/// Handle carried by every task belonging to one run
#[derive(Debug, Clone)]
pub struct RunTicket {
    id: u64,
    token: CancellationToken,
    inner: Arc<GenerationInner>,
}

impl RunTicket {
    /// Generation id of this run
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this run is still the newest one
    pub fn is_current(&self) -> bool {
        self.inner.counter.load(Ordering::SeqCst) == self.id
    }

    /// Resolves once a newer run supersedes this one
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_begin_increments() {
        let generation = Generation::new();

        let first = generation.begin();
        let second = generation.begin();

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
    }

    #[test]
    fn test_new_run_makes_previous_stale() {
        let generation = Generation::new();
        let first = generation.begin();
        assert!(first.is_current());
        assert!(!first.token.is_cancelled());

        let second = generation.begin();
        assert!(!first.is_current());
        assert!(first.token.is_cancelled());
        assert!(second.is_current());
        assert!(!second.token.is_cancelled());
    }

    #[test]
    fn test_concurrent_begin_leaves_newest_run_live() {
        for _ in 0..50 {
            let generation = Generation::new();
            let barrier = Barrier::new(8);

            let tickets: Vec<RunTicket> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            generation.begin()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let current: Vec<_> = tickets.iter().filter(|t| t.is_current()).collect();
            assert_eq!(current.len(), 1);
            assert!(!current[0].token.is_cancelled());
            assert_eq!(
                tickets.iter().filter(|t| t.token.is_cancelled()).count(),
                tickets.len() - 1
            );
        }
    }

    #[tokio::test]
    async fn test_cancelled_resolves_for_stale_run() {
        let generation = Generation::new();
        let first = generation.begin();
        let waiter = {
            let ticket = first.clone();
            tokio::spawn(async move { ticket.cancelled().await })
        };

        generation.begin();
        waiter.await.unwrap();
        assert!(first.token.is_cancelled());
    }
}
