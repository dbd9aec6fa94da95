//! Scheduling primitives shared by Nova's POM resolution crates.
//!
//! Everything here is synchronous and thread based; the only async surface is
//! [`TaskHandle::join`], so callers living on a tokio runtime can await results
//! without tying up a worker.

mod context;
mod pool;
mod queue;
mod reader;
mod task;
mod timeout;

use std::time::Duration;

pub use context::RequestContext;
pub use pool::{JobQueue, WorkerPool};
pub use queue::PriorityQueue;
pub use reader::{is_cancellation, CancellableReader, DEFAULT_CHUNK_SIZE};
pub use task::{task_pair, TaskCompleter, TaskHandle};
pub use timeout::run_with_timeout;
pub use tokio_util::sync::CancellationToken;

/// Marker for work abandoned because its token was cancelled.
///
/// This is an expected outcome of superseded work, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked,
    #[error("task exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}
