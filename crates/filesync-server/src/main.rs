use std::sync::Arc;

use clap::Parser;
use filesync_core::proto::file_sync_server::FileSyncServer;
use filesync_core::FILE_DESCRIPTOR_SET;
use filesync_server::config::Config;
use filesync_server::lock::LockManager;
use filesync_server::pubsub::PubSub;
use filesync_server::service::FileSyncService;
use filesync_server::storage::Mount;
use tokio::signal;
use tokio::sync::watch;
use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    info!("Starting filesync-server");
    info!("  Mount root: {}", config.mount.display());

    let mount = Arc::new(Mount::new(&config.mount)?);
    let locks = Arc::new(LockManager::new());
    let pubsub = Arc::new(PubSub::new(mount.clone()));

    let service = FileSyncService::new(mount, locks, pubsub);
    let svc = FileSyncServer::new(service);

    let reflection_svc = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let mut shutdown_rx = create_shutdown_signal();
    let shutdown_future = async move {
        let _ = shutdown_rx.wait_for(|&v| v).await;
    };

    let addr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Listening on tcp://{}", addr);

    Server::builder()
        .add_service(reflection_svc)
        .add_service(svc)
        .serve_with_shutdown(addr, shutdown_future)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
            info!("Received Ctrl+C, initiating shutdown");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
            info!("Received SIGTERM, initiating shutdown");
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
