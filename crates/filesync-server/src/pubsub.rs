//! Change-notification fan-out: one outbound FIFO queue per subscriber,
//! publish-on-write/delete, delivery never sent back to the originator.
//!
//! The registry is constructor-injected into the service rather than a
//! process-wide singleton so every test gets its own instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use filesync_core::hash::file_sha256;
use filesync_core::proto::{FileInfo, FileUpdate, UpdateType};
use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, info};

use crate::storage::Mount;

pub type UpdateSender = mpsc::UnboundedSender<Result<FileUpdate, Status>>;

/// Subscriber registry and monotonic store version.
pub struct PubSub {
    mount: Arc<Mount>,
    version: AtomicU64,
    subscribers: DashMap<String, UpdateSender>,
}

impl PubSub {
    pub fn new(mount: Arc<Mount>) -> Self {
        Self {
            mount,
            version: AtomicU64::new(0),
            subscribers: DashMap::new(),
        }
    }

    /// Register the single active sink for `client_id`. Returns false if a
    /// live subscription already exists for that id; a sink whose receiver
    /// has gone away is replaced rather than blocking resubscription.
    pub fn subscribe(&self, client_id: &str, sender: UpdateSender) -> bool {
        match self.subscribers.entry(client_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    occupied.insert(sender);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(sender);
                true
            }
        }
    }

    pub fn unsubscribe(&self, client_id: &str) {
        self.subscribers.remove(client_id);
    }

    /// Current global store version. A liveness hint only: it says
    /// "something changed", not "this path's latest version".
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Bump the version after a successful store.
    pub fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Enqueue a change event for every subscriber except the originator.
    /// Hash and is-directory are computed at publish time. A subscriber
    /// whose transport has failed is unregistered; it must resubscribe.
    pub fn publish(&self, origin_client_id: &str, logical_path: &str, update: UpdateType) {
        let resolved = self.mount.resolve(logical_path);
        let is_dir = resolved.is_dir();
        let hash = if update == UpdateType::Deleted || is_dir {
            String::new()
        } else {
            file_sha256(&resolved).unwrap_or_default()
        };

        let event = FileUpdate {
            r#type: update as i32,
            info: Some(FileInfo {
                path: logical_path.to_string(),
                is_dir,
                hash,
            }),
            version: self.version(),
        };

        let mut dead = Vec::new();
        for subscriber in self.subscribers.iter() {
            if subscriber.key() == origin_client_id {
                continue;
            }
            if subscriber.value().send(Ok(event.clone())).is_err() {
                dead.push(subscriber.key().clone());
            }
        }

        debug!(
            path = %logical_path,
            ?update,
            subscribers = self.subscribers.len(),
            "published change event"
        );

        for client_id in dead {
            self.subscribers.remove(&client_id);
            info!(%client_id, "unregistered unreachable subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pubsub() -> (PubSub, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mount = Arc::new(Mount::new(dir.path()).unwrap());
        (PubSub::new(mount), dir)
    }

    #[tokio::test]
    async fn second_subscribe_for_same_id_is_rejected() {
        let (pubsub, _dir) = make_pubsub();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert!(pubsub.subscribe("c1", tx1));
        assert!(!pubsub.subscribe("c1", tx2));
    }

    #[tokio::test]
    async fn unsubscribe_frees_the_id() {
        let (pubsub, _dir) = make_pubsub();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        assert!(pubsub.subscribe("c1", tx1));

        pubsub.unsubscribe("c1");

        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(pubsub.subscribe("c1", tx2));
    }

    #[tokio::test]
    async fn stale_subscription_is_replaced() {
        let (pubsub, _dir) = make_pubsub();
        let (tx1, rx1) = mpsc::unbounded_channel();
        assert!(pubsub.subscribe("c1", tx1));
        drop(rx1);

        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(pubsub.subscribe("c1", tx2));
    }

    #[tokio::test]
    async fn publish_skips_originator_and_reaches_others() {
        let (pubsub, dir) = make_pubsub();
        std::fs::write(dir.path().join("f.txt"), b"payload").unwrap();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        assert!(pubsub.subscribe("a", tx_a));
        assert!(pubsub.subscribe("b", tx_b));

        pubsub.bump_version();
        pubsub.publish("a", "f.txt", UpdateType::Modified);

        let event = rx_b.try_recv().unwrap().unwrap();
        assert_eq!(event.r#type(), UpdateType::Modified);
        assert_eq!(event.version, 1);
        let info = event.info.unwrap();
        assert_eq!(info.path, "f.txt");
        assert!(!info.hash.is_empty());

        assert!(rx_a.try_recv().is_err(), "originator must not be notified");
    }

    #[tokio::test]
    async fn dead_subscriber_is_dropped_on_publish() {
        let (pubsub, _dir) = make_pubsub();
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        assert!(pubsub.subscribe("a", tx_a));
        drop(rx_a);

        pubsub.publish("other", "gone.txt", UpdateType::Deleted);
        assert!(pubsub.subscribers.is_empty());
    }
}
