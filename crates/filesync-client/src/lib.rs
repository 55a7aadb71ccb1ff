//! Client side of the filesync file store.
//!
//! `SyncClient` wraps the generated gRPC client with the lock-then-stream
//! protocol, `session` serializes local callers racing on the same path,
//! `watcher` turns filesystem events into outbound store/remove calls, and
//! `sync` applies inbound change notifications to the local mirror.

pub mod client;
pub mod config;
pub mod identity;
pub mod session;
pub mod sync;
pub mod watcher;

pub use client::SyncClient;
