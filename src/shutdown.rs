use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Watch for SIGTERM and SIGINT delivered to this process.
///
/// The returned token is cancelled on the first of either signal. Handlers are
/// registered before returning, so a signal arriving right after the call is
/// not lost.
pub fn termination_token() -> io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping task");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping task");
            }
        }
        cancel.cancel();
    });

    Ok(token)
}
