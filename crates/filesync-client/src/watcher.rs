//! Filesystem watcher driving outbound sync.
//!
//! Raw `notify` events collapse into four actions: created and modified
//! trigger a store of the changed path, removed triggers a remote remove,
//! and renames are observed but not reconciled because there is no
//! remote rename operation.

use std::path::Path;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::SyncClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Created,
    Removed,
    Modified,
    Renamed,
}

/// Collapse a raw event kind into a sync action, if it is one we act on.
pub fn classify(kind: &EventKind) -> Option<WatchAction> {
    match kind {
        EventKind::Create(_) => Some(WatchAction::Created),
        EventKind::Remove(_) => Some(WatchAction::Removed),
        EventKind::Modify(ModifyKind::Name(_)) => Some(WatchAction::Renamed),
        EventKind::Modify(_) => Some(WatchAction::Modified),
        _ => None,
    }
}

/// Recursive watcher over the local mirror, forwarding events to a tokio
/// task that drives the client.
pub struct MountWatcher {
    // Kept alive for the lifetime of the watch; dropping it stops the
    // platform watcher.
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl MountWatcher {
    pub fn start(client: SyncClient) -> notify::Result<Self> {
        let root = client.mount().to_path_buf();
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(err) => warn!(%err, "filesystem watch error"),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching local mirror");

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(action) = classify(&event.kind) else {
                    continue;
                };
                for path in &event.paths {
                    apply(&client, &root, action, path).await;
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

async fn apply(client: &SyncClient, root: &Path, action: WatchAction, path: &Path) {
    let Ok(relative) = path.strip_prefix(root) else {
        return;
    };
    let logical = relative.to_string_lossy().replace('\\', "/");
    if logical.is_empty() {
        return;
    }

    match action {
        WatchAction::Created | WatchAction::Modified => {
            // Directories materialize remotely when a file is stored
            // under them.
            if path.is_dir() {
                return;
            }
            if let Err(status) = client.store_file(&logical).await {
                warn!(%status, path = %logical, "store after local change failed");
            }
        }
        WatchAction::Removed => {
            if let Err(status) = client.remove_file(&logical).await {
                debug!(%status, path = %logical, "remove after local delete failed");
            }
        }
        WatchAction::Renamed => {
            // Observed but not reconciled: no remote rename RPC exists.
            info!(path = %logical, "rename observed; not synced");
        }
    }
}
