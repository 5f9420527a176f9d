//! Fire-and-forget task spawning.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::Result;

/// Spawn a detached task whose outcome is observed only through logging.
///
/// Errors (and nothing else) are reported with `tracing::warn!`; they are
/// never propagated to the spawner. Used for coroutine message handlers and
/// any background work whose failure should not tear anything down.
pub fn spawn_logged<F>(future: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = future.await {
            tracing::warn!(error = %error, "background task failed");
        }
    })
}
