//! Server side of the filesync file store.
//!
//! The pieces compose bottom-up: `lock` owns the per-path reader/writer
//! locks and their open-handle sessions, `storage` resolves logical paths
//! under the mount root and enumerates directories, `pubsub` fans change
//! events out to subscribers, and `service` wires all three into the gRPC
//! surface.

pub mod config;
pub mod lock;
pub mod pubsub;
pub mod service;
pub mod storage;
