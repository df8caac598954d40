use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Long-lived background activity owned by the
/// [`WorkerRegistry`](super::WorkerRegistry).
///
/// Cancellation is cooperative: `run` must watch `token` and return soon
/// after it fires. A worker that ignores the token makes `release` wait
/// forever.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Runs until the work is done or `token` is cancelled.
    async fn run(&self, token: CancellationToken) -> anyhow::Result<()>;

    /// Called once by `release` before the token is cancelled.
    async fn on_pre_stop(&self) {}
}
