//! Per-shard fetch state machine.
//!
//! A shard owns one contiguous byte range of the destination file. Its
//! `run` method streams the remaining part of that range into the file,
//! publishing progress events as chunks land. Transient failures are
//! reported as [`ShardRun::Retry`] while budget remains, so the worker pool
//! can hand the shard to any free worker for another attempt; progress is
//! kept across attempts and the next request asks only for the narrower
//! remaining range.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::disk::RegionWriter;
use crate::error::{FetchError, FetchResult, RetrySignal};
use crate::events::{EventBroker, Publisher, TOPIC_SHARD_DONE, TOPIC_SHARD_START, TOPIC_SIZE_ADD};
use crate::http::{ByteRange, HttpClient};

/// Configuration of one shard: which range of which URL lands where.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardConfig {
    /// Download URL.
    pub url: String,
    /// Shard order, 1-based and unique within a task.
    pub order: u32,
    /// Destination file the range is written into.
    pub file_path: PathBuf,
    /// First byte of the range (inclusive).
    pub range_start: u64,
    /// Last byte of the range (inclusive).
    pub range_end: u64,
}

/// Mutable progress of one shard.
///
/// Mutated only by the worker currently running the shard; read by the
/// monitor for journal snapshots, hence the atomics. The retry counter and
/// started flag are runtime-only and never journaled.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardStatus {
    /// Bytes of the range already written to disk.
    pub download_size: AtomicU64,
    /// True once the full range is on disk.
    pub task_done: AtomicBool,
    #[serde(skip)]
    pub retry_count: AtomicU32,
    #[serde(skip)]
    started: AtomicBool,
}

/// One shard of a parallel download task.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShardTask {
    pub config: ShardConfig,
    pub status: ShardStatus,
}

/// Outcome of a single shard attempt that did not fail fatally.
#[derive(Debug)]
pub enum ShardRun {
    /// The range is fully on disk.
    Done,
    /// The attempt failed but retry budget remains.
    Retry(RetrySignal),
}

/// Publisher handles a shard emits progress through.
///
/// Built fresh for every run from the task's current broker, so recovered
/// tasks never see handles from a previous session.
#[derive(Clone, Debug)]
pub struct ShardEvents {
    started: Publisher,
    size_add: Publisher,
    done: Publisher,
}

impl ShardEvents {
    pub fn new(broker: &EventBroker) -> Self {
        Self {
            started: broker.publisher(TOPIC_SHARD_START),
            size_add: broker.publisher(TOPIC_SIZE_ADD),
            done: broker.publisher(TOPIC_SHARD_DONE),
        }
    }
}

impl ShardTask {
    pub fn new(url: &str, order: u32, file_path: &Path, range_start: u64, range_end: u64) -> Self {
        Self {
            config: ShardConfig {
                url: url.to_string(),
                order,
                file_path: file_path.to_path_buf(),
                range_start,
                range_end,
            },
            status: ShardStatus::default(),
        }
    }

    /// Length of the shard's range in bytes.
    pub fn range_len(&self) -> u64 {
        self.config.range_end - self.config.range_start + 1
    }

    /// Bytes already written to disk.
    pub fn downloaded(&self) -> u64 {
        self.status.download_size.load(Ordering::Acquire)
    }

    /// Bytes still missing from the range.
    pub fn remaining(&self) -> u64 {
        self.range_len() - self.downloaded()
    }

    pub fn is_done(&self) -> bool {
        self.status.task_done.load(Ordering::Acquire)
    }

    pub fn retry_count(&self) -> u32 {
        self.status.retry_count.load(Ordering::Acquire)
    }

    /// Run the fetch state machine for this shard.
    ///
    /// Idempotent on completed shards: a shard whose range is already on
    /// disk returns [`ShardRun::Done`] without touching the network, which
    /// is what makes replaying a recovered task safe.
    pub async fn run(
        &self,
        client: &HttpClient,
        events: &ShardEvents,
        max_retries: u32,
    ) -> FetchResult<ShardRun> {
        if self.is_done() {
            return Ok(ShardRun::Done);
        }
        // Only the first attempt of a session counts towards concurrency.
        if !self.status.started.swap(true, Ordering::AcqRel) {
            events.started.publish(0).await;
        }

        // A journal written between the last byte and the done flag can
        // leave a fully-downloaded shard unflagged; requesting its empty
        // remainder would be an invalid range.
        if self.remaining() == 0 {
            self.status.task_done.store(true, Ordering::Release);
            events.done.publish(0).await;
            return Ok(ShardRun::Done);
        }

        let offset = self.config.range_start + self.downloaded();
        debug!(
            shard = self.config.order,
            offset,
            range_end = self.config.range_end,
            "fetching shard range"
        );

        // Local file errors are fatal, never retried.
        let mut writer = RegionWriter::open(&self.config.file_path, offset).await?;

        let response = match client
            .send(
                &self.config.url,
                Method::GET,
                ByteRange::Span(offset, self.config.range_end),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => return self.retry_or(max_retries, "sending the range request failed", err),
        };

        let status = response.status().as_u16();
        if status == 200 {
            // The server answered the ranged request with the whole file:
            // it does not actually honor ranges, and writing the full body
            // at this shard's offset would corrupt the destination.
            return Err(FetchError::RangeUnsupported);
        }
        if status >= 300 {
            return self.retry_or(
                max_retries,
                &format!("status {}", status),
                FetchError::Status(status),
            );
        }

        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    writer.write_chunk(&chunk).await?;
                    self.status
                        .download_size
                        .fetch_add(chunk.len() as u64, Ordering::AcqRel);
                    events.size_add.publish(chunk.len() as i64).await;
                }
                Ok(None) => break,
                Err(err) => {
                    return self.retry_or(max_retries, "reading the response body failed", err.into())
                }
            }
        }

        if self.remaining() > 0 {
            return self.retry_or(
                max_retries,
                "the body ended before the range was complete",
                FetchError::Truncated {
                    expected: self.range_len(),
                    received: self.downloaded(),
                },
            );
        }

        self.status.task_done.store(true, Ordering::Release);
        events.done.publish(0).await;
        debug!(shard = self.config.order, "shard complete");
        Ok(ShardRun::Done)
    }

    /// Consume one unit of retry budget, or surface the underlying error
    /// once the budget is exhausted.
    pub(crate) fn retry_or(
        &self,
        max_retries: u32,
        reason: &str,
        err: FetchError,
    ) -> FetchResult<ShardRun> {
        let used = self.status.retry_count.load(Ordering::Acquire);
        if used < max_retries {
            let attempt = used + 1;
            self.status.retry_count.store(attempt, Ordering::Release);
            Ok(ShardRun::Retry(RetrySignal {
                order: self.config.order,
                attempt,
                reason: reason.to_string(),
            }))
        } else {
            Err(err)
        }
    }
}
