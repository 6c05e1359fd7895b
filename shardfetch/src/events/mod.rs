//! Event fabric connecting shard workers to task-level observers.
//!
//! Two cooperating primitives:
//!
//! - [`EventBroker`]: a string-keyed, bounded, many-producer event bus with
//!   a single consumer task that dispatches subscriber callbacks serially.
//! - [`StatusSubject`]: a latest-value publisher that coalesces
//!   high-frequency state changes into rate-limited observer notifications.
//!
//! Shards publish byte-delta events into the broker; broker subscribers
//! fold them into aggregate counters and push snapshots to the subject; the
//! subject notifies user observers at most once per configured interval.

mod broker;
mod subject;

pub use broker::{BrokerBuilder, Event, EventBroker, Publisher};
pub use subject::StatusSubject;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Topic published each time a shard writes a chunk; payload is the chunk
/// length in bytes.
pub const TOPIC_SIZE_ADD: &str = "size-add";

/// Topic published when a shard starts fetching; payload 0.
pub const TOPIC_SHARD_START: &str = "shard-start";

/// Topic published when a shard finishes its range; payload 0.
pub const TOPIC_SHARD_DONE: &str = "shard-done";

/// Point-in-time status of a running download task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TaskStatus {
    /// Total size of the remote resource in bytes.
    pub total_size: u64,
    /// Bytes downloaded so far, across all shards.
    pub download_size: u64,
    /// Number of shards currently fetching.
    pub concurrency: usize,
    /// Instantaneous speed in bytes per millisecond, computed per observer
    /// from the delta since its previous notification.
    pub speed: f64,
    /// True on the final notification, whether the task succeeded, failed,
    /// or was interrupted.
    pub is_shutdown: bool,
}

/// Aggregate counters for a running task.
///
/// Written only by the broker consumer (a single task), read by the monitor
/// and the subject, so plain atomic loads and stores suffice.
#[derive(Debug)]
pub struct TaskCounters {
    total: u64,
    downloaded: AtomicU64,
    concurrency: AtomicUsize,
}

impl TaskCounters {
    /// Create counters for a task of `total` bytes, `downloaded` of which
    /// are already on disk.
    pub fn new(total: u64, downloaded: u64) -> Self {
        Self {
            total,
            downloaded: AtomicU64::new(downloaded),
            concurrency: AtomicUsize::new(0),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Acquire)
    }

    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn shard_started(&self) {
        self.concurrency.fetch_add(1, Ordering::AcqRel);
    }

    pub fn shard_finished(&self) {
        self.concurrency.fetch_sub(1, Ordering::AcqRel);
    }

    /// Build a status snapshot from the current counter values.
    pub fn snapshot(&self, is_shutdown: bool) -> TaskStatus {
        TaskStatus {
            total_size: self.total,
            download_size: self.downloaded(),
            concurrency: self.concurrency(),
            speed: 0.0,
            is_shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_downloads() {
        let counters = TaskCounters::new(1000, 0);
        counters.add_downloaded(250);
        counters.add_downloaded(250);

        assert_eq!(counters.downloaded(), 500);
        assert_eq!(counters.total(), 1000);
    }

    #[test]
    fn test_counters_resume_baseline() {
        let counters = TaskCounters::new(1000, 400);
        counters.add_downloaded(100);
        assert_eq!(counters.downloaded(), 500);
    }

    #[test]
    fn test_counters_concurrency() {
        let counters = TaskCounters::new(10, 0);
        counters.shard_started();
        counters.shard_started();
        counters.shard_finished();

        assert_eq!(counters.concurrency(), 1);
    }

    #[test]
    fn test_snapshot() {
        let counters = TaskCounters::new(1000, 0);
        counters.add_downloaded(42);
        counters.shard_started();

        let status = counters.snapshot(false);
        assert_eq!(status.total_size, 1000);
        assert_eq!(status.download_size, 42);
        assert_eq!(status.concurrency, 1);
        assert!(!status.is_shutdown);

        let terminal = counters.snapshot(true);
        assert!(terminal.is_shutdown);
    }
}
