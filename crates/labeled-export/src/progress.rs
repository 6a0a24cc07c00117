// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for progress of long-running stages.
///
/// A stage is opened with [`begin`](Self::begin) and advanced with
/// [`report`](Self::report). Units are stage specific: items for downloads,
/// bytes for uploads.
pub trait ProgressReporter: Send + Sync {
    fn begin(&self, message: &str, total: u64);
    fn report(&self, delta: u64);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn begin(&self, _message: &str, _total: u64) {}
    fn report(&self, _delta: u64) {}
}

/// Logs stage starts at `info` and advancement at `debug`.
#[derive(Debug, Default)]
pub struct LogProgress {
    current: AtomicU64,
    total: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

impl ProgressReporter for LogProgress {
    fn begin(&self, message: &str, total: u64) {
        self.current.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        log::info!("{} ({} total)", message, total);
    }

    fn report(&self, delta: u64) {
        let current = self.current.fetch_add(delta, Ordering::SeqCst) + delta;
        log::debug!("progress {}/{}", current, self.total.load(Ordering::SeqCst));
    }
}
