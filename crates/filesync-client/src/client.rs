//! Typed client for the file store RPC surface.
//!
//! Every mutating call follows the same shape: take the client-local
//! session for the path, acquire the remote lock with `GetFileLock`, then
//! drive the transfer stream. The remote lock is released by the server
//! when the stream completes (or the RPC for unary calls); the stream
//! itself never acquires or escalates locks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use filesync_core::proto::file_sync_client::FileSyncClient;
use filesync_core::proto::{
    FetchFileRequest, FileChunk, FileInfo, FileLockRequest, ListFilesRequest, LockOp,
    RemoveFileRequest,
};
use filesync_core::CHUNK_SIZE;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tonic::transport::Channel;
use tonic::Status;
use tracing::{debug, info, warn};

use crate::session::SessionRegistry;

/// Handle to the remote file store, bound to one client identity and one
/// local mirror directory. Cheap to clone; clones share the channel and
/// the local session registry.
#[derive(Clone)]
pub struct SyncClient {
    inner: FileSyncClient<Channel>,
    mount: PathBuf,
    client_id: String,
    sessions: Arc<SessionRegistry>,
}

impl SyncClient {
    /// Connect to the server at `endpoint`, mirroring files under `mount`.
    pub async fn connect(
        endpoint: String,
        mount: PathBuf,
        client_id: String,
    ) -> Result<Self, tonic::transport::Error> {
        let inner = FileSyncClient::connect(endpoint).await?;
        Ok(Self {
            inner,
            mount,
            client_id,
            sessions: Arc::new(SessionRegistry::new()),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// Resolve a logical path to its location in the local mirror.
    pub fn resolve(&self, logical: &str) -> PathBuf {
        self.mount.join(logical.trim_start_matches(['/', '\\']))
    }

    pub async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>, Status> {
        let mut rpc = self.inner.clone();
        let response = rpc
            .list_files(ListFilesRequest {
                path: path.to_string(),
            })
            .await?;
        Ok(response.into_inner().files)
    }

    pub async fn get_read_lock(&self, path: &str) -> Result<(), Status> {
        self.get_lock(path, LockOp::Read).await
    }

    /// `create` selects the write-class lock (creates the remote file if
    /// missing); without it the delete-class lock is requested.
    pub async fn get_write_lock(&self, path: &str, create: bool) -> Result<(), Status> {
        let op = if create { LockOp::Write } else { LockOp::Delete };
        self.get_lock(path, op).await
    }

    async fn get_lock(&self, path: &str, op: LockOp) -> Result<(), Status> {
        let mut rpc = self.inner.clone();
        rpc.get_file_lock(FileLockRequest {
            client_id: self.client_id.clone(),
            path: path.to_string(),
            op: op as i32,
        })
        .await?;
        Ok(())
    }

    /// Upload the local copy of `logical` to the server, chunk by chunk.
    /// The write lock is acquired up front and released by the server when
    /// the stream ends.
    pub async fn store_file(&self, logical: &str) -> Result<(), Status> {
        let session = self.sessions.acquire(logical);
        let result = async {
            let _local = session.mu.lock().await;

            // Open before locking so a missing local file never wedges the
            // remote path behind an unused write lock.
            let local_path = self.resolve(logical);
            let mut file = tokio::fs::File::open(&local_path)
                .await
                .map_err(|err| Status::not_found(format!("{}: {err}", local_path.display())))?;

            self.get_write_lock(logical, true).await?;

            let client_id = self.client_id.clone();
            let path = logical.to_string();
            let outbound = async_stream::stream! {
                let mut offset: u64 = 0;
                loop {
                    let mut buf = vec![0u8; CHUNK_SIZE];
                    let n = match file.read(&mut buf).await {
                        Ok(n) => n,
                        Err(err) => {
                            warn!(%err, "local read failed mid-store");
                            break;
                        }
                    };
                    buf.truncate(n);
                    if n == 0 && offset > 0 {
                        break;
                    }
                    yield FileChunk {
                        // Identity and path ride on the first chunk only.
                        client_id: if offset == 0 { client_id.clone() } else { String::new() },
                        path: if offset == 0 { path.clone() } else { String::new() },
                        offset,
                        data: buf,
                    };
                    if n == 0 {
                        break;
                    }
                    offset += n as u64;
                }
            };

            let mut rpc = self.inner.clone();
            let response = rpc.store_file(outbound).await?.into_inner();
            debug!(path = %logical, message = %response.message, "store complete");
            Ok(())
        }
        .await;
        self.sessions.release(logical);
        result
    }

    /// Download `logical` from the server, overwriting the local copy.
    pub async fn fetch_file(&self, logical: &str) -> Result<(), Status> {
        let session = self.sessions.acquire(logical);
        let result = async {
            let _local = session.mu.lock().await;

            self.get_read_lock(logical).await?;

            let mut rpc = self.inner.clone();
            let mut stream = rpc
                .fetch_file(FetchFileRequest {
                    client_id: self.client_id.clone(),
                    path: logical.to_string(),
                })
                .await?
                .into_inner();

            // Open the local target only after the remote stream exists;
            // on a local failure the stream is drained to completion so
            // the server still releases the read lock.
            let local_path = self.resolve(logical);
            let opened = async {
                if let Some(parent) = local_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::File::create(&local_path).await
            }
            .await;
            let mut out = match opened {
                Ok(out) => out,
                Err(err) => {
                    while let Ok(Some(_)) = stream.message().await {}
                    return Err(Status::internal(format!(
                        "{}: {err}",
                        local_path.display()
                    )));
                }
            };

            while let Some(chunk) = stream.message().await? {
                out.seek(std::io::SeekFrom::Start(chunk.offset))
                    .await
                    .map_err(|err| Status::internal(err.to_string()))?;
                out.write_all(&chunk.data)
                    .await
                    .map_err(|err| Status::internal(err.to_string()))?;
            }
            out.flush()
                .await
                .map_err(|err| Status::internal(err.to_string()))?;

            debug!(path = %logical, "fetch complete");
            Ok(())
        }
        .await;
        self.sessions.release(logical);
        result
    }

    /// Delete `logical` on the server. Requires the delete-class lock,
    /// which the server consumes during the call.
    pub async fn remove_file(&self, logical: &str) -> Result<(), Status> {
        let session = self.sessions.acquire(logical);
        let result = async {
            let _local = session.mu.lock().await;

            self.get_write_lock(logical, false).await?;

            let mut rpc = self.inner.clone();
            rpc.remove_file(RemoveFileRequest {
                client_id: self.client_id.clone(),
                path: logical.to_string(),
            })
            .await?;
            info!(path = %logical, "remote file removed");
            Ok(())
        }
        .await;
        self.sessions.release(logical);
        result
    }

    pub(crate) fn rpc(&self) -> FileSyncClient<Channel> {
        self.inner.clone()
    }
}
