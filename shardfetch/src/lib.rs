//! Shardfetch - resumable, sharded HTTP file downloading
//!
//! This library downloads a remote resource to a local file, either as a
//! single stream ([`MonoGetTask`]) or split into byte-range shards fetched
//! by a bounded worker pool ([`ParallelGetTask`]). Both task kinds persist
//! their progress to a sidecar journal so an interrupted run can be resumed
//! without re-downloading completed bytes.
//!
//! # Example
//!
//! ```ignore
//! use shardfetch::{FetchConfig, ParallelGetTask};
//!
//! let config = FetchConfig::default();
//! let mut task = ParallelGetTask::with_defaults(
//!     "https://example.com/big.iso",
//!     "downloads/big.iso",
//!     8,
//!     config,
//! );
//! task.subscribe_status(shardfetch::status::console_subscriber());
//! task.run().await?;
//! ```

pub mod checksum;
pub mod config;
pub mod disk;
pub mod error;
pub mod events;
pub mod http;
pub mod pool;
pub mod status;
pub mod task;

pub use checksum::ChecksumAlgorithm;
pub use config::{FetchConfig, ProxyMode};
pub use error::{FetchError, FetchResult};
pub use events::TaskStatus;
pub use task::mono::MonoGetTask;
pub use task::parallel::ParallelGetTask;
pub use task::shard::ShardTask;
