use tokio::{signal, sync::broadcast};
use tracing::{error, info};

/// Broadcasts once when the process is asked to stop.
pub fn create_shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    let (shutdown_sender, shutdown_receiver) = broadcast::channel::<()>(1);
    let signal_sender = shutdown_sender.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        if signal_sender.send(()).is_err() {
            error!("No listeners left for shutdown signal");
        }
    });
    (shutdown_sender, shutdown_receiver)
}

// Source: https://pg3.dev/post/7
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
