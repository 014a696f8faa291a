use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

use crate::results::ProgressSnapshot;

/// Publish a snapshot every this many examined files
pub const PROGRESS_INTERVAL: u64 = 100;

/// Tracks how many files a session has examined.
///
/// Workers call [`ProgressTracker::record_file`] once per file. Every
/// [`PROGRESS_INTERVAL`]th file a snapshot is handed to the publish callback.
/// Publication is serialized and stale snapshots are dropped, so the
/// `processed` values a consumer sees never go backwards.
#[derive(Debug)]
pub struct ProgressTracker {
    processed: AtomicU64,
    total: u64,
    started: Instant,
    interval: u64,
    last_published: Mutex<u64>,
}

impl ProgressTracker {
    /// Creates a tracker for a search over `total` files. The clock starts now.
    pub fn new(total: u64) -> Self {
        Self::with_interval(total, PROGRESS_INTERVAL)
    }

    /// Creates a tracker publishing every `interval` files
    pub fn with_interval(total: u64, interval: u64) -> Self {
        Self {
            processed: AtomicU64::new(0),
            total,
            started: Instant::now(),
            interval: interval.max(1),
            last_published: Mutex::new(0),
        }
    }

    /// Records one examined file and publishes a snapshot when due.
    ///
    /// Returns the processed count including this file.
    pub fn record_file<F>(&self, publish: F) -> u64
    where
        F: FnOnce(ProgressSnapshot),
    {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % self.interval == 0 {
            let mut last = self
                .last_published
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if processed > *last {
                *last = processed;
                publish(self.snapshot_at(processed));
            } else {
                debug!("Dropping stale progress snapshot at {} files", processed);
            }
        }
        processed
    }

    /// Publishes the current state unconditionally.
    ///
    /// Called once when the search phase ends so the consumer always
    /// receives an accurate final snapshot.
    pub fn publish_final<F>(&self, publish: F) -> ProgressSnapshot
    where
        F: FnOnce(ProgressSnapshot),
    {
        let mut last = self
            .last_published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.snapshot();
        *last = snapshot.processed;
        publish(snapshot);
        snapshot
    }

    /// Files examined so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Files found by the counting pass
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Current progress, computed on demand
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(self.processed())
    }

    fn snapshot_at(&self, processed: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            processed,
            total: self.total,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    /// Logs a one-line summary of the run
    pub fn log_stats(&self) {
        let snapshot = self.snapshot();
        info!(
            "Processed {}/{} files ({:.1}%) in {:.1}s, {:.0} files/sec",
            snapshot.processed,
            snapshot.total,
            snapshot.percent(),
            snapshot.elapsed_secs,
            snapshot.throughput()
        );
    }
}
