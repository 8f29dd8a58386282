//! Process-wide cancellation (§5, §9: a shared cancellation signal closes
//! the receiver, dispatcher, periodic driver, and digest scheduler).
//! Built on `tokio::sync::watch<bool>`, the same primitive
//! `review_chat::spawn_receiver` already expects — no `tokio-util`
//! dependency, matching the rest of this workspace's dependency stack.

use tokio::sync::watch;

pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Waits for SIGINT or SIGTERM, then flips the shared flag.
pub async fn wait_for_signal(tx: watch::Sender<bool>) {
    let ctrl_c = async { tokio::signal::ctrl_c().await };

    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    tracing::info!("shutdown signal received, cancelling all workers");
    let _ = tx.send(true);
}

#[must_use]
pub fn is_cancelled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}
