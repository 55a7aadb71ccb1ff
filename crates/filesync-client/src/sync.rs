//! Inbound change-notification loop.
//!
//! `begin_sync` opens the SubscribeUpdates stream and applies each event
//! to the local mirror: Modified fetches the path (last write wins, no
//! conflict detection), Deleted removes the local copy if present.

use filesync_core::proto::{FileUpdate, SubscribeRequest, UpdateType};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::SyncClient;

/// Handle to the running update loop; abort it with `end_sync`.
pub struct SyncHandle {
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Cancel the subscription stream. The server drops the sink on the
    /// next failed delivery; resubscribing is a fresh `begin_sync`.
    pub fn end_sync(self) {
        self.task.abort();
    }
}

impl SyncClient {
    /// Subscribe to server-push updates on a background task.
    pub fn begin_sync(&self) -> SyncHandle {
        let client = self.clone();
        let task = tokio::spawn(async move {
            client.run_update_loop().await;
        });
        SyncHandle { task }
    }

    async fn run_update_loop(&self) {
        let mut rpc = self.rpc();
        let subscription = rpc
            .subscribe_updates(SubscribeRequest {
                client_id: self.client_id().to_string(),
            })
            .await;

        let mut stream = match subscription {
            Ok(response) => response.into_inner(),
            Err(status) => {
                error!(%status, "subscribe failed");
                return;
            }
        };
        info!(client_id = %self.client_id(), "update stream open");

        loop {
            match stream.message().await {
                Ok(Some(update)) => self.apply_update(update).await,
                Ok(None) => {
                    info!("update stream closed by server");
                    return;
                }
                Err(status) => {
                    warn!(%status, "update stream error");
                    return;
                }
            }
        }
    }

    async fn apply_update(&self, update: FileUpdate) {
        let Some(ref info) = update.info else { return };
        if info.is_dir {
            return;
        }

        match update.r#type() {
            UpdateType::Modified => {
                debug!(path = %info.path, version = update.version, "remote modification");
                if let Err(status) = self.fetch_file(&info.path).await {
                    warn!(%status, path = %info.path, "fetch after remote modification failed");
                }
            }
            UpdateType::Deleted => {
                debug!(path = %info.path, version = update.version, "remote deletion");
                let local = self.resolve(&info.path);
                match tokio::fs::remove_file(&local).await {
                    Ok(()) => debug!(path = %info.path, "local copy removed"),
                    // Nothing local to delete is the common idempotent case.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => warn!(%err, path = %info.path, "local delete failed"),
                }
            }
            UpdateType::Unspecified => {}
        }
    }
}
