mod scheduler;
mod signal;
mod task;

pub use scheduler::Scheduler;
pub use task::Task;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Destination for the output a task produces.
///
/// Implemented by the printer handle; anything that can take a chunk of bytes
/// tagged with the producing task's id will do.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Accept one chunk. May wait while the destination is full.
    async fn accept(&self, task_id: usize, chunk: Bytes);
}

/// Unit of work admitted by the [`Scheduler`].
#[async_trait]
pub trait Job: Send + 'static {
    /// Run to completion, or until `token` fires.
    async fn execute(&mut self, token: &CancellationToken);
}
