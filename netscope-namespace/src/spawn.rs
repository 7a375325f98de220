//! Running namespace sessions from async code
//!
//! A session pins the network namespace of one OS thread, so it must never
//! run on a runtime worker that other tasks share. These helpers run it on
//! a dedicated thread and hand the result back over a oneshot channel.

use netscope_core::Result;
use tokio::sync::oneshot;

use crate::config::SessionConfig;
use crate::session::with_namespace;

/// Run `body` inside a namespace on a fresh OS thread
///
/// # Errors
/// Returns the session error, or [`Error::WorkerLost`](netscope_core::Error::WorkerLost)
/// if `body` panicked
pub async fn spawn_in_namespace<F, R>(config: SessionConfig, body: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("netscope-session".to_string())
        .spawn(move || {
            let result = with_namespace(&config, body);
            if tx.send(result).is_err() {
                tracing::debug!("Namespace task result dropped by receiver");
            }
        })?;

    rx.await?
}
