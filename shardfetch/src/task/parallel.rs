//! Sharded parallel download task.
//!
//! The orchestrator probes the remote length, partitions it into contiguous
//! shards, pre-allocates the destination, and runs one worker per shard
//! through the [`WorkerPool`]. Shards publish byte-delta events into an
//! [`EventBroker`]; three subscribers fold them into aggregate counters and
//! push snapshots to the [`StatusSubject`], which notifies user observers
//! at a bounded rate. The pool monitor snapshots the journal while the
//! download runs, so any termination point is resumable.
//!
//! ```text
//! ParallelGetTask::run
//!         │ probe ─ partition ─ allocate
//!         ▼
//!    WorkerPool ──► ShardTask::run ──► size-add / shard-start / shard-done
//!         │                                      │
//!         │ on_tick: journal                     ▼
//!         │                               EventBroker (bounded queue)
//!         ▼                                      │
//!    terminal snapshot ◄── TaskCounters ◄────────┘
//!                │
//!                ▼
//!          StatusSubject ──► observers (throttled)
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::checksum::{self, ChecksumAlgorithm};
use crate::config::FetchConfig;
use crate::disk::allocate_blank_file;
use crate::error::{FetchError, FetchResult};
use crate::events::{
    BrokerBuilder, StatusSubject, TaskCounters, TaskStatus, TOPIC_SHARD_DONE, TOPIC_SHARD_START,
    TOPIC_SIZE_ADD,
};
use crate::http::HttpClient;
use crate::pool::{BoxFuture, PoolDriver, PoolHandle, WorkerPool};
use crate::task::journal;
use crate::task::shard::{ShardEvents, ShardRun, ShardTask};

/// Configuration of a parallel download task.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelGetTaskConfig {
    /// Download URL.
    pub url: String,
    /// Destination file.
    pub file_path: PathBuf,
    /// Shard count, clamped to the total size once it is known.
    pub concurrent: u32,
    /// Delay between worker admissions, in milliseconds.
    pub shard_start_delay: u64,
}

/// Progress of a parallel download task.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelGetTaskStatus {
    /// Total size of the remote resource, fixed after the probe.
    pub total_size: u64,
    /// Shards in range order.
    pub shard_list: Vec<Arc<ShardTask>>,
}

/// The journal document: configuration plus shard progress, nothing
/// transient.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ParallelJournal {
    config: ParallelGetTaskConfig,
    status: ParallelGetTaskStatus,
}

/// A sharded parallel download task.
///
/// Construct with [`new`](Self::new) / [`with_defaults`](Self::with_defaults)
/// for a fresh download or [`from_journal`](Self::from_journal) to resume,
/// then call [`run`](Self::run) once.
pub struct ParallelGetTask {
    config: ParallelGetTaskConfig,
    status: ParallelGetTaskStatus,
    journal_path: PathBuf,
    recovered: bool,
    fetch_config: FetchConfig,
    subject: Arc<StatusSubject>,
}

impl ParallelGetTask {
    /// Create a fresh task.
    ///
    /// An empty `journal_path` disables journaling (and with it, resume).
    pub fn new(
        url: impl Into<String>,
        file_path: impl Into<PathBuf>,
        journal_path: impl Into<PathBuf>,
        concurrent: u32,
        shard_start_delay: Duration,
        fetch_config: FetchConfig,
    ) -> Self {
        let subject = Arc::new(StatusSubject::new(fetch_config.notify_interval));
        Self {
            config: ParallelGetTaskConfig {
                url: url.into(),
                file_path: file_path.into(),
                concurrent: concurrent.max(1),
                shard_start_delay: shard_start_delay.as_millis() as u64,
            },
            status: ParallelGetTaskStatus {
                total_size: 0,
                shard_list: Vec::new(),
            },
            journal_path: journal_path.into(),
            recovered: false,
            fetch_config,
            subject,
        }
    }

    /// Create a task journaling next to the destination file
    /// (`<file>.process.json`) with no admission delay.
    pub fn with_defaults(
        url: impl Into<String>,
        file_path: impl Into<PathBuf>,
        concurrent: u32,
        fetch_config: FetchConfig,
    ) -> Self {
        let file_path = file_path.into();
        let journal_path = default_journal_path(&file_path);
        Self::new(
            url,
            file_path,
            journal_path,
            concurrent,
            Duration::ZERO,
            fetch_config,
        )
    }

    /// Create a task without a journal: nothing is persisted and an
    /// interrupted download cannot be resumed.
    pub fn simple(
        url: impl Into<String>,
        file_path: impl Into<PathBuf>,
        concurrent: u32,
        fetch_config: FetchConfig,
    ) -> Self {
        Self::new(
            url,
            file_path,
            PathBuf::new(),
            concurrent,
            Duration::ZERO,
            fetch_config,
        )
    }

    /// Resume a task from its journal.
    pub fn from_journal(path: impl Into<PathBuf>, fetch_config: FetchConfig) -> FetchResult<Self> {
        let path = path.into();
        let record: ParallelJournal = journal::load(&path)?;
        info!(journal = %path.display(), url = %record.config.url, "recovered parallel task");
        let subject = Arc::new(StatusSubject::new(fetch_config.notify_interval));
        Ok(Self {
            config: record.config,
            status: record.status,
            journal_path: path,
            recovered: true,
            fetch_config,
            subject,
        })
    }

    /// Register a status observer.
    ///
    /// Invoked at most once per configured notify interval; the final
    /// invocation always carries `is_shutdown = true`.
    pub fn subscribe_status(&self, callback: impl FnMut(TaskStatus) + Send + 'static) {
        self.subject.subscribe(self.downloaded(), callback);
    }

    /// Verify the completed file against an expected digest.
    pub fn verify_checksum(
        &self,
        algorithm: ChecksumAlgorithm,
        expected: &str,
    ) -> FetchResult<bool> {
        checksum::verify_file(&self.config.file_path, algorithm, expected)
    }

    /// Total size of the remote resource; 0 before the probe.
    pub fn total_size(&self) -> u64 {
        self.status.total_size
    }

    /// Sum of the bytes every shard has written to disk.
    pub fn downloaded(&self) -> u64 {
        self.status.shard_list.iter().map(|s| s.downloaded()).sum()
    }

    /// The task's shards, in range order. Empty before the first run of a
    /// fresh task.
    pub fn shards(&self) -> &[Arc<ShardTask>] {
        &self.status.shard_list
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn file_path(&self) -> &Path {
        &self.config.file_path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Run the download to completion.
    ///
    /// Not re-entrant: a task object runs once. On success the journal is
    /// deleted; on any other exit it is kept so the task can be resumed
    /// with [`from_journal`](Self::from_journal).
    pub async fn run(&mut self) -> FetchResult<()> {
        let client = HttpClient::new(&self.fetch_config)?;
        self.prepare(&client).await?;

        let downloaded = self.downloaded();
        let counters = Arc::new(TaskCounters::new(self.status.total_size, downloaded));
        info!(
            url = %self.config.url,
            total = self.status.total_size,
            shards = self.status.shard_list.len(),
            downloaded,
            recovered = self.recovered,
            "starting parallel download"
        );

        let broker = {
            let size_counters = Arc::clone(&counters);
            let size_subject = Arc::clone(&self.subject);
            let start_counters = Arc::clone(&counters);
            let start_subject = Arc::clone(&self.subject);
            let done_counters = Arc::clone(&counters);
            let done_subject = Arc::clone(&self.subject);
            BrokerBuilder::new()
                .subscribe(TOPIC_SIZE_ADD, move |event| {
                    size_counters.add_downloaded(event.payload as u64);
                    size_subject.publish(size_counters.snapshot(false));
                })
                .subscribe(TOPIC_SHARD_START, move |_| {
                    start_counters.shard_started();
                    start_subject.publish(start_counters.snapshot(false));
                })
                .subscribe(TOPIC_SHARD_DONE, move |_| {
                    done_counters.shard_finished();
                    done_subject.publish(done_counters.snapshot(false));
                })
                .start(3 * self.status.shard_list.len())
        };

        let driver = Arc::new(ShardDriver {
            client,
            events: ShardEvents::new(&broker),
            max_retries: self.fetch_config.max_retries,
            journal_config: self.config.clone(),
            total_size: self.status.total_size,
            shards: self.status.shard_list.clone(),
            journal_path: self.journal_path.clone(),
            first_error: Mutex::new(None),
        });

        // First snapshot before any byte moves, so even an immediate crash
        // leaves a resumable journal.
        driver.save_journal();
        self.subject.start();

        let pool = WorkerPool::new(
            self.status.shard_list.clone(),
            self.status.shard_list.len(),
            Duration::from_millis(self.config.shard_start_delay),
            self.fetch_config.monitor_interval,
            Arc::clone(&driver) as Arc<dyn PoolDriver<Arc<ShardTask>>>,
        );
        pool.start().await;

        let interrupted = pool.is_interrupted();
        let first_error = driver.first_error.lock().unwrap().take();
        if interrupted || first_error.is_some() {
            driver.save_journal();
        }

        // Release every publisher handle, then drain the broker so the
        // aggregate counters are final before the terminal snapshot.
        drop(pool);
        drop(driver);
        broker.close().await;

        self.subject.publish(counters.snapshot(true));
        self.subject.close().await;

        match first_error {
            Some(err) => {
                error!(url = %self.config.url, error = %err, "parallel download failed");
                Err(err)
            }
            None if interrupted => Err(FetchError::Interrupted),
            None => {
                journal::delete(&self.journal_path);
                info!(file = %self.config.file_path.display(), "download complete");
                Ok(())
            }
        }
    }

    /// Probe the remote resource and bring the shard list into its running
    /// shape: partition + allocate for fresh tasks, consistency checks for
    /// recovered ones.
    async fn prepare(&mut self, client: &HttpClient) -> FetchResult<()> {
        let info = client.probe(&self.config.url).await?;

        if self.recovered {
            if self.status.total_size != info.length {
                return Err(FetchError::RecoveryMismatch {
                    recorded: self.status.total_size,
                    probed: info.length,
                });
            }
            // The probe's range signal is only checked for fresh tasks; a
            // server that stopped advertising ranges but still serves them
            // can finish a recovered download. One that truly dropped them
            // answers the first shard request with 200, which the shard
            // rejects as RangeUnsupported.
            return Ok(());
        }

        if !info.supports_range {
            return Err(FetchError::RangeUnsupported);
        }

        self.status.total_size = info.length;
        // A shard must own at least one byte.
        let shard_count = u64::from(self.config.concurrent).min(info.length).max(1);
        if shard_count < u64::from(self.config.concurrent) {
            warn!(
                requested = self.config.concurrent,
                clamped = shard_count,
                "shard count exceeds file size, clamping"
            );
        }
        self.config.concurrent = shard_count as u32;
        self.status.shard_list = partition_shards(
            &self.config.url,
            &self.config.file_path,
            info.length,
            shard_count,
        );
        allocate_blank_file(&self.config.file_path, info.length).await?;
        Ok(())
    }
}

/// Split `total` bytes into `count` contiguous shards.
///
/// Floor division, with the remainder absorbed by the last shard. Both
/// range ends are inclusive.
fn partition_shards(url: &str, file_path: &Path, total: u64, count: u64) -> Vec<Arc<ShardTask>> {
    let base = total / count;
    (0..count)
        .map(|i| {
            let start = i * base;
            let end = if i == count - 1 {
                total - 1
            } else {
                (i + 1) * base - 1
            };
            Arc::new(ShardTask::new(
                url,
                (i + 1) as u32,
                file_path,
                start,
                end,
            ))
        })
        .collect()
}

/// Default journal location: next to the destination file.
pub(crate) fn default_journal_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(".process.json");
    PathBuf::from(name)
}

/// Pool driver executing shards and snapshotting the journal.
struct ShardDriver {
    client: HttpClient,
    events: ShardEvents,
    max_retries: u32,
    journal_config: ParallelGetTaskConfig,
    total_size: u64,
    shards: Vec<Arc<ShardTask>>,
    journal_path: PathBuf,
    first_error: Mutex<Option<FetchError>>,
}

impl ShardDriver {
    fn save_journal(&self) {
        let record = ParallelJournal {
            config: self.journal_config.clone(),
            status: ParallelGetTaskStatus {
                total_size: self.total_size,
                shard_list: self.shards.clone(),
            },
        };
        if let Err(err) = journal::save(&record, &self.journal_path) {
            warn!(error = %err, "journal snapshot failed");
        }
    }
}

impl PoolDriver<Arc<ShardTask>> for ShardDriver {
    fn execute<'a>(
        &'a self,
        shard: Arc<ShardTask>,
        pool: &'a PoolHandle<Arc<ShardTask>>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if shard.is_done() {
                return;
            }
            match shard.run(&self.client, &self.events, self.max_retries).await {
                Ok(ShardRun::Done) => {}
                Ok(ShardRun::Retry(signal)) => {
                    warn!("{}", signal);
                    pool.retry(shard);
                }
                Err(err) => {
                    error!(shard = shard.config.order, error = %err, "shard failed");
                    let mut slot = self.first_error.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                    pool.interrupt();
                }
            }
        })
    }

    fn on_tick<'a>(&'a self, _pool: &'a PoolHandle<Arc<ShardTask>>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.save_journal();
        })
    }
}
