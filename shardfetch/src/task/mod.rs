//! Download tasks.
//!
//! - [`parallel`]: sharded parallel download through a worker pool
//! - [`mono`]: single-stream download with a single resume offset
//! - [`shard`]: the per-shard fetch state machine
//! - [`journal`]: sidecar persistence for resumable tasks

pub mod journal;
pub mod mono;
pub mod parallel;
pub mod shard;
