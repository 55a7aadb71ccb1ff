use anyhow::Context;
use clap::Parser;
use filesync_client::config::Config;
use filesync_client::identity::Identity;
use filesync_client::watcher::MountWatcher;
use filesync_client::SyncClient;
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
    let mount = config.mount_dir();
    std::fs::create_dir_all(&mount)
        .with_context(|| format!("creating mirror directory {}", mount.display()))?;

    let identity = Identity::load_or_create(&config.identity_file())?;

    info!("Starting filesync-client");
    info!("  Server:    {}", config.server);
    info!("  Mirror:    {}", mount.display());
    info!("  Client id: {}", identity.client_id);

    let client = SyncClient::connect(config.server.clone(), mount, identity.client_id)
        .await
        .with_context(|| format!("connecting to {}", config.server))?;

    let sync = client.begin_sync();
    let watcher = MountWatcher::start(client).context("starting filesystem watcher")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down");

    watcher.stop();
    sync.end_sync();
    info!("Client shutdown complete");
    Ok(())
}
