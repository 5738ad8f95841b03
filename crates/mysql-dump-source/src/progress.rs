//! Progress counters for the chunk queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

/// Lock-free counters shared by planners, workers and the status reporter.
#[derive(Clone)]
pub struct Progress {
    total_chunks: Arc<AtomicU64>,
    queued_chunks: Arc<AtomicU64>,
    rows_written: Arc<AtomicU64>,
    start_time: Instant,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_chunks: u64,
    pub queued_chunks: u64,
    pub rows_written: u64,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        Self {
            total_chunks: Arc::new(AtomicU64::new(0)),
            queued_chunks: Arc::new(AtomicU64::new(0)),
            rows_written: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// A chunk entered the queue.
    pub fn chunk_queued(&self) {
        self.total_chunks.fetch_add(1, Ordering::Relaxed);
        self.queued_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// A chunk left the queue.
    pub fn chunk_taken(&self) {
        self.queued_chunks.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_rows(&self, count: u64) {
        self.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
            queued_chunks: self.queued_chunks.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log queue depth every `interval` until the handle is aborted.
    pub fn start_status_reporter(&self, interval: Duration) -> JoinHandle<()> {
        let progress = self.clone();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            // The first tick completes immediately.
            interval_timer.tick().await;

            loop {
                interval_timer.tick().await;
                let snapshot = progress.snapshot();
                info!(
                    "Queue: {} of {} ({} rows written)",
                    snapshot.queued_chunks, snapshot.total_chunks, snapshot.rows_written
                );
            }
        })
    }
}
