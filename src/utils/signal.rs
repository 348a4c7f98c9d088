//! Process shutdown signalling

use std::future::Future;
use tokio::sync::watch;
use tracing::{error, info};

/// Wait for `signal` and flip `shutdown` to true.
///
/// If the signal cannot be listened for, the sender is kept alive forever so
/// receivers never mistake its drop for a shutdown request.
pub async fn relay_shutdown<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    let _ = shutdown.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_flips_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(relay_shutdown(async { Ok(()) }, tx));

        rx.wait_for(|stop| *stop).await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_failure_keeps_service_running() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(relay_shutdown(
            async { Err(io::Error::new(io::ErrorKind::Other, "signals unavailable")) },
            tx,
        ));

        tokio::time::sleep(Duration::from_secs(3600)).await;

        // Sender still alive and nothing was sent.
        assert!(matches!(rx.has_changed(), Ok(false)));
        assert!(!*rx.borrow());
    }
}
