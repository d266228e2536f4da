//! Graceful shutdown coordination. Every background loop subscribes to the
//! broadcast channel and exits at its next await point once the signal
//! fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

pub type ShutdownReceiver = broadcast::Receiver<()>;

pub struct ShutdownHandler {
    shutdown_flag: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownHandler {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { shutdown_flag: Arc::new(AtomicBool::new(false)), sender }
    }

    pub fn subscribe(&self) -> ShutdownReceiver {
        self.sender.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Trigger shutdown; idempotent
    pub fn shutdown(&self) {
        if self.shutdown_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("initiating graceful shutdown");
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes when SIGINT or SIGTERM arrives
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
        info!("received Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag() {
        let handler = ShutdownHandler::new();
        assert!(!handler.is_shutting_down());
        handler.shutdown();
        assert!(handler.is_shutting_down());
        // Idempotent
        handler.shutdown();
        assert!(handler.is_shutting_down());
    }

    #[tokio::test]
    async fn test_subscribers_receive_signal() {
        let handler = ShutdownHandler::new();
        let mut receiver = handler.subscribe();
        handler.shutdown();
        assert!(receiver.recv().await.is_ok());
    }
}
