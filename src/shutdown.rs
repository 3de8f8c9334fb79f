use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first SIGTERM or SIGINT.
///
/// The handlers are registered before this returns, so a signal arriving
/// right after start-up is not lost. The returned task ends after the first
/// signal, or when `token` is cancelled for another reason.
pub fn install_shutdown_handler(token: CancellationToken) -> io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!(signal = "SIGTERM", "Received signal, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!(signal = "SIGINT", "Received signal, shutting down");
            }
            _ = token.cancelled() => return,
        }

        token.cancel();
    }))
}

/// Cancel `token` and wait for the signal listener, logging if it failed.
pub async fn stop_shutdown_handler(token: &CancellationToken, handle: JoinHandle<()>) {
    token.cancel();
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Signal handler task failed");
    }
}
