//! Stable client identity, persisted as JSON next to the mirror config.
//!
//! The server keys lock sessions and update subscriptions by client id,
//! so the id must survive restarts; a fresh UUID is minted only on first
//! run.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub client_id: String,
}

impl Identity {
    /// Load the identity from `path`, creating (and persisting) a new one
    /// if the file does not exist yet.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let identity: Identity = serde_json::from_str(&raw)
                    .with_context(|| format!("malformed identity file {}", path.display()))?;
                Ok(identity)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let identity = Identity {
                    client_id: Uuid::new_v4().to_string(),
                };
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let raw = serde_json::to_string_pretty(&identity)?;
                std::fs::write(path, raw)
                    .with_context(|| format!("writing identity file {}", path.display()))?;
                info!(client_id = %identity.client_id, "new client identity created");
                Ok(identity)
            }
            Err(err) => {
                Err(err).with_context(|| format!("reading identity file {}", path.display()))
            }
        }
    }
}
