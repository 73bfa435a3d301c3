// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Progress reporting for batch runs

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Snapshot of a run's progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub processed: usize,
    pub total: usize,
    /// Set once the archive is ready (or the run ended)
    pub finished: bool,
}

impl ProgressState {
    pub fn new(total: usize) -> Self {
        Self { processed: 0, total, finished: false }
    }
}

/// Receives `(processed, total)` after each file
pub trait ProgressSink: Send + Sync {
    fn report(&self, processed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn report(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}

/// Discards all reports
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _processed: usize, _total: usize) {}
}

/// Publishes progress on a watch channel for web sessions
pub struct WatchProgress {
    tx: watch::Sender<ProgressState>,
}

impl WatchProgress {
    pub fn new(tx: watch::Sender<ProgressState>) -> Self {
        Self { tx }
    }

    /// Signal that the run is over, whatever its outcome
    pub fn finish(&self) {
        self.tx.send_modify(|state| state.finished = true);
    }
}

impl ProgressSink for WatchProgress {
    fn report(&self, processed: usize, total: usize) {
        self.tx.send_replace(ProgressState {
            processed: processed.min(total),
            total,
            finished: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: usize, t: usize| seen.lock().unwrap().push((p, t));
        sink.report(1, 2);
        sink.report(2, 2);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_watch_progress() {
        let (tx, rx) = watch::channel(ProgressState::new(3));
        let sink = WatchProgress::new(tx);

        sink.report(2, 3);
        assert_eq!(*rx.borrow(), ProgressState { processed: 2, total: 3, finished: false });

        sink.finish();
        assert!(rx.borrow().finished);
        assert_eq!(rx.borrow().processed, 2);
    }
}
