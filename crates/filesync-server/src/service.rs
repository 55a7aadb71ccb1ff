//! gRPC surface of the file store.
//!
//! Streams never acquire locks themselves: `GetFileLock` acquires, the
//! store/fetch stream transfers, and an RAII guard releases the session
//! exactly once on every termination path: normal end, error or client
//! cancellation.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use filesync_core::proto::file_sync_server::FileSync;
use filesync_core::proto::{
    FetchFileRequest, FileChunk, FileInfo, FileLockRequest, FileLockResponse, FileUpdate,
    ListFilesRequest, ListFilesResponse, LockOp, RemoveFileRequest, RemoveFileResponse,
    StoreFileResponse, SubscribeRequest, UpdateType,
};
use filesync_core::{StoreError, CHUNK_SIZE};
use tokio::sync::mpsc;
use tokio::task;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, instrument};

use crate::lock::{LockManager, RemoveOutcome};
use crate::pubsub::PubSub;
use crate::storage::Mount;

type StreamResult<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Releases a write session when dropped, unless disarmed first.
/// Guarantees exactly-once release on cancellation and error paths.
struct WriteGuard {
    locks: Arc<LockManager>,
    client_id: String,
    path: PathBuf,
    armed: bool,
}

impl WriteGuard {
    fn new(locks: Arc<LockManager>, client_id: String, path: PathBuf) -> Self {
        Self {
            locks,
            client_id,
            path,
            armed: true,
        }
    }

    fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.armed {
            self.armed = false;
            self.locks.release_write(&self.client_id, &self.path);
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Read-session counterpart of `WriteGuard`.
struct ReadGuard {
    locks: Arc<LockManager>,
    client_id: String,
    path: PathBuf,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.locks.release_read(&self.client_id, &self.path);
    }
}

/// The file store service: lock manager, mount and fan-out are
/// constructor-injected so tests run against their own instances.
pub struct FileSyncService {
    mount: Arc<Mount>,
    locks: Arc<LockManager>,
    pubsub: Arc<PubSub>,
}

impl FileSyncService {
    pub fn new(mount: Arc<Mount>, locks: Arc<LockManager>, pubsub: Arc<PubSub>) -> Self {
        Self {
            mount,
            locks,
            pubsub,
        }
    }
}

#[tonic::async_trait]
impl FileSync for FileSyncService {
    type FetchFileStream = StreamResult<FileChunk>;
    type SubscribeUpdatesStream = StreamResult<FileUpdate>;

    #[instrument(skip(self, request), level = "debug")]
    async fn list_files(
        &self,
        request: Request<ListFilesRequest>,
    ) -> Result<Response<ListFilesResponse>, Status> {
        let req = request.into_inner();
        let mount = self.mount.clone();

        let entries = task::spawn_blocking(move || mount.list(&req.path))
            .await
            .map_err(|e| Status::internal(e.to_string()))??;

        let files = entries
            .into_iter()
            .map(|e| FileInfo {
                path: e.path,
                is_dir: e.is_dir,
                hash: e.hash,
            })
            .collect();

        Ok(Response::new(ListFilesResponse { files }))
    }

    #[instrument(skip(self, request), level = "debug")]
    async fn get_file_lock(
        &self,
        request: Request<FileLockRequest>,
    ) -> Result<Response<FileLockResponse>, Status> {
        let req = request.into_inner();
        if req.client_id.is_empty() {
            return Err(Status::invalid_argument("client_id is required"));
        }

        let op = LockOp::try_from(req.op)
            .map_err(|_| Status::invalid_argument("unknown lock op"))?;
        if op == LockOp::Unspecified {
            return Err(Status::invalid_argument("lock op is required"));
        }

        let path = self.mount.resolve(&req.path);
        let locks = self.locks.clone();
        let client_id = req.client_id.clone();

        // Acquisition blocks until the wait predicate holds; keep it off
        // the async workers.
        let ok = task::spawn_blocking(move || match op {
            LockOp::Read => locks.acquire_read(&client_id, &path),
            LockOp::Write => locks.acquire_write(&client_id, &path, true),
            LockOp::Delete => locks.acquire_write(&client_id, &path, false),
            LockOp::Unspecified => false,
        })
        .await
        .map_err(|e| Status::internal(e.to_string()))?;

        if ok {
            debug!(client_id = %req.client_id, path = %req.path, ?op, "lock granted");
            Ok(Response::new(FileLockResponse { success: true }))
        } else {
            Err(StoreError::Contention.into())
        }
    }

    #[instrument(skip(self, request), level = "debug")]
    async fn remove_file(
        &self,
        request: Request<RemoveFileRequest>,
    ) -> Result<Response<RemoveFileResponse>, Status> {
        let req = request.into_inner();
        let path = self.mount.resolve(&req.path);

        let locks = self.locks.clone();
        let client_id = req.client_id.clone();
        let remove_path = path.clone();
        let outcome = task::spawn_blocking(move || locks.remove(&client_id, &remove_path))
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        // The delete-class lock is consumed either way; on success remove()
        // already cleared the sessions and this is a no-op.
        self.locks.release_write(&req.client_id, &path);

        match outcome {
            RemoveOutcome::Removed => {
                info!(client_id = %req.client_id, path = %req.path, "file removed");
                self.pubsub
                    .publish(&req.client_id, &req.path, UpdateType::Deleted);
                Ok(Response::new(RemoveFileResponse { success: true }))
            }
            RemoveOutcome::NotFound => Err(StoreError::NotFound(req.path).into()),
            RemoveOutcome::Locked => Err(StoreError::Contention.into()),
            RemoveOutcome::Error => Err(Status::internal("file deletion error")),
        }
    }

    #[instrument(skip(self, request), level = "debug")]
    async fn store_file(
        &self,
        request: Request<Streaming<FileChunk>>,
    ) -> Result<Response<StoreFileResponse>, Status> {
        let mut stream = request.into_inner();

        let mut guard: Option<WriteGuard> = None;
        let mut logical = String::new();
        let mut offset: u64 = 0;

        // A transport error or cancellation exits via `?`; the guard's Drop
        // still releases the write session, and nothing is published.
        while let Some(chunk) = stream.message().await? {
            let active = guard.get_or_insert_with(|| {
                logical = chunk.path.clone();
                WriteGuard::new(
                    self.locks.clone(),
                    chunk.client_id.clone(),
                    self.mount.resolve(&chunk.path),
                )
            });

            let locks = self.locks.clone();
            let client_id = active.client_id.clone();
            let path = active.path.clone();
            let len = chunk.data.len() as u64;
            let at = offset;

            let ok = task::spawn_blocking(move || locks.write_at(&client_id, &path, at, &chunk.data))
                .await
                .map_err(|e| Status::internal(e.to_string()))?;
            if !ok {
                return Err(StoreError::DataLoss("chunk write failed".to_string()).into());
            }
            offset += len;
        }

        let Some(guard) = guard else {
            return Err(Status::invalid_argument("store stream carried no chunks"));
        };

        let client_id = guard.client_id.clone();
        guard.release();

        let version = self.pubsub.bump_version();
        self.pubsub
            .publish(&client_id, &logical, UpdateType::Modified);
        info!(%client_id, path = %logical, bytes = offset, version, "file stored");

        Ok(Response::new(StoreFileResponse {
            success: true,
            message: "file stored".to_string(),
        }))
    }

    #[instrument(skip(self, request), level = "debug")]
    async fn fetch_file(
        &self,
        request: Request<FetchFileRequest>,
    ) -> Result<Response<Self::FetchFileStream>, Status> {
        let req = request.into_inner();
        let logical = req.path.clone();
        let path = self.mount.resolve(&req.path);
        let locks = self.locks.clone();
        let client_id = req.client_id.clone();

        let (tx, rx) = mpsc::channel::<Result<FileChunk, Status>>(1);

        tokio::spawn(async move {
            // Dropped on every exit from this task, releasing the read
            // session exactly once, including when the client goes away
            // and `tx.send` starts failing.
            let _guard = ReadGuard {
                locks: locks.clone(),
                client_id: client_id.clone(),
                path: path.clone(),
            };
            let mut offset: u64 = 0;

            loop {
                let locks = locks.clone();
                let client_id = client_id.clone();
                let path = path.clone();
                let read = task::spawn_blocking(move || {
                    let mut buf = vec![0u8; CHUNK_SIZE];
                    locks.read_at(&client_id, &path, offset, &mut buf).map(|n| {
                        buf.truncate(n);
                        buf
                    })
                })
                .await;

                let data = match read {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        let err = StoreError::DataLoss("file read error".to_string());
                        let _ = tx.send(Err(err.into())).await;
                        return;
                    }
                    Err(join_err) => {
                        let _ = tx.send(Err(Status::internal(join_err.to_string()))).await;
                        return;
                    }
                };

                // Zero-byte read marks end of file.
                if data.is_empty() {
                    return;
                }

                let len = data.len() as u64;
                let chunk = FileChunk {
                    client_id: String::new(),
                    // Only the first chunk names the file.
                    path: if offset == 0 {
                        logical.clone()
                    } else {
                        String::new()
                    },
                    offset,
                    data,
                };
                offset += len;

                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    #[instrument(skip(self, request), level = "debug")]
    async fn subscribe_updates(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeUpdatesStream>, Status> {
        let req = request.into_inner();
        if req.client_id.is_empty() {
            return Err(Status::invalid_argument("client_id is required"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if !self.pubsub.subscribe(&req.client_id, tx) {
            return Err(Status::already_exists(
                "a subscription is already active for this client",
            ));
        }

        info!(client_id = %req.client_id, "client subscribed to updates");
        Ok(Response::new(Box::pin(UnboundedReceiverStream::new(rx))))
    }
}
