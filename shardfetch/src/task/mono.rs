//! Single-stream download task.
//!
//! The mono task streams the whole resource through one connection,
//! resuming from a single offset. Unlike the sharded task it tolerates
//! servers without byte-range support: it simply restarts from the
//! beginning. Progress is journaled and published from a background
//! monitor on the same cadence the parallel task uses.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checksum::{self, ChecksumAlgorithm};
use crate::config::FetchConfig;
use crate::disk::{allocate_blank_file, RegionWriter};
use crate::error::{FetchError, FetchResult, RetrySignal};
use crate::events::{StatusSubject, TaskStatus};
use crate::http::{ByteRange, HttpClient};
use crate::task::journal;
use crate::task::parallel::default_journal_path;

/// Configuration of a single-stream download task.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonoGetTaskConfig {
    pub url: String,
    pub file_path: PathBuf,
}

/// Progress of a single-stream download task.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonoGetTaskStatus {
    /// Total size of the remote resource, fixed after the probe.
    pub total_size: AtomicU64,
    /// Bytes written to disk so far.
    pub download_size: AtomicU64,
    #[serde(skip)]
    retry_count: AtomicU32,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MonoJournal {
    config: MonoGetTaskConfig,
    status: Arc<MonoGetTaskStatus>,
}

/// A single-stream download task with resume support.
pub struct MonoGetTask {
    config: MonoGetTaskConfig,
    status: Arc<MonoGetTaskStatus>,
    journal_path: PathBuf,
    recovered: bool,
    fetch_config: FetchConfig,
    subject: Arc<StatusSubject>,
}

impl MonoGetTask {
    /// Create a fresh task. An empty `journal_path` disables journaling.
    pub fn new(
        url: impl Into<String>,
        file_path: impl Into<PathBuf>,
        journal_path: impl Into<PathBuf>,
        fetch_config: FetchConfig,
    ) -> Self {
        let subject = Arc::new(StatusSubject::new(fetch_config.notify_interval));
        Self {
            config: MonoGetTaskConfig {
                url: url.into(),
                file_path: file_path.into(),
            },
            status: Arc::new(MonoGetTaskStatus::default()),
            journal_path: journal_path.into(),
            recovered: false,
            fetch_config,
            subject,
        }
    }

    /// Create a task journaling next to the destination file.
    pub fn with_defaults(
        url: impl Into<String>,
        file_path: impl Into<PathBuf>,
        fetch_config: FetchConfig,
    ) -> Self {
        let file_path = file_path.into();
        let journal_path = default_journal_path(&file_path);
        Self::new(url, file_path, journal_path, fetch_config)
    }

    /// Create a task without a journal: nothing is persisted and an
    /// interrupted download cannot be resumed.
    pub fn simple(
        url: impl Into<String>,
        file_path: impl Into<PathBuf>,
        fetch_config: FetchConfig,
    ) -> Self {
        Self::new(url, file_path, PathBuf::new(), fetch_config)
    }

    /// Resume a task from its journal.
    pub fn from_journal(path: impl Into<PathBuf>, fetch_config: FetchConfig) -> FetchResult<Self> {
        let path = path.into();
        let record: MonoJournal = journal::load(&path)?;
        info!(journal = %path.display(), url = %record.config.url, "recovered mono task");
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

    /// Register a status observer (same contract as the parallel task).
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

    pub fn total_size(&self) -> u64 {
        self.status.total_size.load(Ordering::Acquire)
    }

    pub fn downloaded(&self) -> u64 {
        self.status.download_size.load(Ordering::Acquire)
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn file_path(&self) -> &Path {
        &self.config.file_path
    }

    /// Run the download to completion. Not re-entrant.
    pub async fn run(&mut self) -> FetchResult<()> {
        let client = HttpClient::new(&self.fetch_config)?;

        let info = client.probe(&self.config.url).await?;
        if !info.supports_range && self.downloaded() > 0 {
            warn!(
                url = %self.config.url,
                "server does not support resume, restarting from the beginning"
            );
            self.status.download_size.store(0, Ordering::Release);
        }
        if self.recovered && self.total_size() != info.length {
            return Err(FetchError::RecoveryMismatch {
                recorded: self.total_size(),
                probed: info.length,
            });
        }
        self.status.total_size.store(info.length, Ordering::Release);
        if !self.recovered {
            allocate_blank_file(&self.config.file_path, info.length).await?;
        }

        info!(
            url = %self.config.url,
            total = info.length,
            offset = self.downloaded(),
            "starting mono download"
        );
        self.subject.start();
        let stop = CancellationToken::new();
        let monitor = self.spawn_monitor(stop.clone());

        let result = loop {
            match self.fetch_file(&client).await {
                Ok(None) => break Ok(()),
                Ok(Some(signal)) => {
                    warn!("{}", signal);
                    continue;
                }
                Err(err) => break Err(err),
            }
        };

        stop.cancel();
        let _ = monitor.await;

        if result.is_err() {
            self.save_journal();
        }
        self.subject.publish(self.snapshot(true));
        self.subject.close().await;

        match result {
            Ok(()) => {
                journal::delete(&self.journal_path);
                info!(file = %self.config.file_path.display(), "download complete");
                Ok(())
            }
            Err(err) => {
                error!(url = %self.config.url, error = %err, "mono download failed");
                Err(err)
            }
        }
    }

    /// One download attempt from the current offset.
    ///
    /// Returns `None` on completion, `Some(signal)` when the attempt failed
    /// but retry budget remains.
    async fn fetch_file(&self, client: &HttpClient) -> FetchResult<Option<RetrySignal>> {
        let mut offset = self.downloaded();
        if offset >= self.total_size() {
            return Ok(None);
        }
        let range = if offset > 0 {
            ByteRange::From(offset)
        } else {
            ByteRange::Full
        };

        let response = match client.send(&self.config.url, Method::GET, range).await {
            Ok(response) => response,
            Err(err) => return self.retry_or("sending the download request failed", err),
        };
        let status = response.status().as_u16();
        if status >= 300 {
            return self.retry_or(&format!("status {}", status), FetchError::Status(status));
        }
        if status == 200 && offset > 0 {
            // The server ignored the resume range and is sending the whole
            // body; write it from the start instead of corrupting the tail.
            warn!("server ignored the resume range, restarting from the beginning");
            self.status.download_size.store(0, Ordering::Release);
            offset = 0;
        }

        let mut writer = RegionWriter::open(&self.config.file_path, offset).await?;
        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    writer.write_chunk(&chunk).await?;
                    self.status
                        .download_size
                        .fetch_add(chunk.len() as u64, Ordering::AcqRel);
                }
                Ok(None) => break,
                Err(err) => {
                    return self.retry_or("reading the response body failed", err.into());
                }
            }
        }

        let downloaded = self.downloaded();
        let total = self.total_size();
        if downloaded < total {
            return self.retry_or(
                "the body ended before the download was complete",
                FetchError::Truncated {
                    expected: total,
                    received: downloaded,
                },
            );
        }
        Ok(None)
    }

    fn retry_or(&self, reason: &str, err: FetchError) -> FetchResult<Option<RetrySignal>> {
        let used = self.status.retry_count.load(Ordering::Acquire);
        if used < self.fetch_config.max_retries {
            let attempt = used + 1;
            self.status.retry_count.store(attempt, Ordering::Release);
            Ok(Some(RetrySignal {
                order: 0,
                attempt,
                reason: reason.to_string(),
            }))
        } else {
            Err(err)
        }
    }

    fn snapshot(&self, is_shutdown: bool) -> TaskStatus {
        TaskStatus {
            total_size: self.total_size(),
            download_size: self.downloaded(),
            concurrency: 1,
            speed: 0.0,
            is_shutdown,
        }
    }

    fn save_journal(&self) {
        let record = MonoJournal {
            config: self.config.clone(),
            status: Arc::clone(&self.status),
        };
        if let Err(err) = journal::save(&record, &self.journal_path) {
            warn!(error = %err, "journal snapshot failed");
        }
    }

    fn spawn_monitor(&self, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
        let config = self.config.clone();
        let status = Arc::clone(&self.status);
        let journal_path = self.journal_path.clone();
        let subject = Arc::clone(&self.subject);
        let interval = self.fetch_config.monitor_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let record = MonoJournal {
                            config: config.clone(),
                            status: Arc::clone(&status),
                        };
                        if let Err(err) = journal::save(&record, &journal_path) {
                            warn!(error = %err, "journal snapshot failed");
                        }
                        subject.publish(TaskStatus {
                            total_size: status.total_size.load(Ordering::Acquire),
                            download_size: status.download_size.load(Ordering::Acquire),
                            concurrency: 1,
                            speed: 0.0,
                            is_shutdown: false,
                        });
                    }
                }
            }
        })
    }
}
