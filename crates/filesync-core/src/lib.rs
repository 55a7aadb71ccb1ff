//! Shared types for the filesync distributed file store.
//!
//! This crate carries everything the server and client agree on:
//! - the protobuf wire definition and generated gRPC code
//! - the error taxonomy (`StoreError`) and its gRPC status mapping
//! - content hashing used for change events and equality checks

pub mod error;
pub mod hash;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("filesync.v1");
}

/// File descriptor set for gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("filesync_descriptor");

/// Size of one streamed file chunk in bytes.
pub const CHUNK_SIZE: usize = 40 * 1024;

pub use error::StoreError;
