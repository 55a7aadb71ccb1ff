use std::io;

use thiserror::Error;
use tonic::Status;

/// Error taxonomy for file store operations.
///
/// No operation in the core retries automatically; retries, if desired,
/// belong to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path is held incompatibly by another client.
    #[error("file is locked by another client")]
    Contention,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Mid-transfer I/O failure. Partial file state is the caller's
    /// responsibility to clean up by re-storing in full.
    #[error("data loss: {0}")]
    DataLoss(String),

    #[error("internal error: {0}")]
    Internal(#[from] io::Error),
}

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Contention => Status::aborted(err.to_string()),
            StoreError::NotFound(_) => Status::not_found(err.to_string()),
            StoreError::Precondition(_) => Status::failed_precondition(err.to_string()),
            StoreError::DataLoss(_) => Status::data_loss(err.to_string()),
            StoreError::Internal(_) => Status::internal(err.to_string()),
        }
    }
}
