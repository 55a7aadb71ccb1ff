//! End-to-end tests over a real gRPC transport: lock-then-stream
//! transfers, the remove status ladder and update fan-out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use filesync_core::proto::file_sync_client::FileSyncClient;
use filesync_core::proto::file_sync_server::FileSyncServer;
use filesync_core::proto::{
    FetchFileRequest, FileChunk, FileLockRequest, ListFilesRequest, LockOp, RemoveFileRequest,
    SubscribeRequest, UpdateType,
};
use filesync_core::CHUNK_SIZE;
use filesync_server::lock::LockManager;
use filesync_server::pubsub::PubSub;
use filesync_server::service::FileSyncService;
use filesync_server::storage::Mount;
use sha2::{Digest, Sha256};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Channel;
use tonic::{Code, Status};

type Client = FileSyncClient<Channel>;

async fn spawn_server() -> (SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mount = Arc::new(Mount::new(dir.path()).unwrap());
    let locks = Arc::new(LockManager::new());
    let pubsub = Arc::new(PubSub::new(mount.clone()));
    let service = FileSyncService::new(mount, locks, pubsub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(FileSyncServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    (addr, dir)
}

async fn connect(addr: SocketAddr) -> Client {
    FileSyncClient::connect(format!("http://{addr}"))
        .await
        .unwrap()
}

async fn lock(client: &mut Client, client_id: &str, path: &str, op: LockOp) -> Result<(), Status> {
    client
        .get_file_lock(FileLockRequest {
            client_id: client_id.to_string(),
            path: path.to_string(),
            op: op as i32,
        })
        .await
        .map(|_| ())
}

fn chunks(client_id: &str, path: &str, data: &[u8]) -> Vec<FileChunk> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    loop {
        let end = (offset + CHUNK_SIZE).min(data.len());
        out.push(FileChunk {
            client_id: if offset == 0 {
                client_id.to_string()
            } else {
                String::new()
            },
            path: if offset == 0 {
                path.to_string()
            } else {
                String::new()
            },
            offset: offset as u64,
            data: data[offset..end].to_vec(),
        });
        if end == data.len() {
            break;
        }
        offset = end;
    }
    out
}

async fn store(client: &mut Client, client_id: &str, path: &str, data: &[u8]) {
    lock(client, client_id, path, LockOp::Write).await.unwrap();
    let response = client
        .store_file(tokio_stream::iter(chunks(client_id, path, data)))
        .await
        .unwrap()
        .into_inner();
    assert!(response.success);
}

async fn fetch(client: &mut Client, client_id: &str, path: &str) -> Vec<u8> {
    lock(client, client_id, path, LockOp::Read).await.unwrap();
    let mut stream = client
        .fetch_file(FetchFileRequest {
            client_id: client_id.to_string(),
            path: path.to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    let mut out = Vec::new();
    while let Some(chunk) = stream.message().await.unwrap() {
        assert_eq!(chunk.offset as usize, out.len(), "chunks arrive in order");
        out.extend_from_slice(&chunk.data);
    }
    out
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn store_then_fetch_round_trips_across_chunk_boundaries() {
    let (addr, _dir) = spawn_server().await;
    let mut client = connect(addr).await;

    for (name, len) in [
        ("empty.bin", 0),
        ("under.bin", CHUNK_SIZE - 1),
        ("exact.bin", CHUNK_SIZE),
        ("multi.bin", CHUNK_SIZE * 3 + 17),
    ] {
        let data = pattern(len);
        store(&mut client, "alice", name, &data).await;
        let fetched = fetch(&mut client, "alice", name).await;
        assert_eq!(fetched, data, "{name}");
    }
}

#[tokio::test]
async fn listing_reports_content_hashes() {
    let (addr, _dir) = spawn_server().await;
    let mut client = connect(addr).await;

    let data = pattern(1024);
    store(&mut client, "alice", "hashed.bin", &data).await;

    let files = client
        .list_files(ListFilesRequest {
            path: String::new(),
        })
        .await
        .unwrap()
        .into_inner()
        .files;

    let entry = files
        .iter()
        .find(|f| f.path == "hashed.bin")
        .expect("stored file listed");
    assert!(!entry.is_dir);
    assert_eq!(entry.hash, hex::encode(Sha256::digest(&data)));
}

#[tokio::test]
async fn lock_requests_are_validated() {
    let (addr, _dir) = spawn_server().await;
    let mut client = connect(addr).await;

    let err = lock(&mut client, "", "a.bin", LockOp::Read).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = lock(&mut client, "alice", "a.bin", LockOp::Unspecified)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    // Read locks never create files.
    let err = lock(&mut client, "alice", "missing.bin", LockOp::Read)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Aborted);
}

#[tokio::test]
async fn writer_handoff_unblocks_a_waiting_writer() {
    let (addr, _dir) = spawn_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    lock(&mut alice, "alice", "contended.bin", LockOp::Write)
        .await
        .unwrap();

    let mut bob_clone = bob.clone();
    let pending = tokio::spawn(async move {
        lock(&mut bob_clone, "bob", "contended.bin", LockOp::Write).await
    });

    // Bob's acquisition must wait while Alice holds the write session.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());

    // Finishing the store releases Alice's session and hands off.
    let response = alice
        .store_file(tokio_stream::iter(chunks("alice", "contended.bin", b"v1")))
        .await
        .unwrap()
        .into_inner();
    assert!(response.success);

    pending.await.unwrap().unwrap();

    // Bob completes his own store to release the lock again.
    let response = bob
        .store_file(tokio_stream::iter(chunks("bob", "contended.bin", b"v2")))
        .await
        .unwrap()
        .into_inner();
    assert!(response.success);
}

#[tokio::test]
async fn readers_never_observe_a_half_written_file() {
    const LEN: usize = CHUNK_SIZE + 7;
    let (addr, _dir) = spawn_server().await;
    let mut writer = connect(addr).await;

    // Seed the file so readers always have a complete version to see.
    store(&mut writer, "writer", "hot.bin", &vec![1u8; LEN]).await;

    let mut readers = Vec::new();
    for r in 0..3 {
        let mut client = connect(addr).await;
        let id = format!("reader-{r}");
        readers.push(tokio::spawn(async move {
            for _ in 0..5 {
                let data = fetch(&mut client, &id, "hot.bin").await;
                assert_eq!(data.len(), LEN);
                let first = data[0];
                assert!((1..=6).contains(&first));
                assert!(
                    data.iter().all(|&b| b == first),
                    "fetch mixed bytes from two stores"
                );
            }
        }));
    }

    for version in 2u8..=6 {
        store(&mut writer, "writer", "hot.bin", &vec![version; LEN]).await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn remove_walks_the_status_ladder() {
    let (addr, dir) = spawn_server().await;
    let mut client = connect(addr).await;

    store(&mut client, "alice", "doomed.bin", b"payload").await;

    // Without a delete-class lock the remove is rejected.
    let err = client
        .remove_file(RemoveFileRequest {
            client_id: "alice".to_string(),
            path: "doomed.bin".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Aborted);
    assert!(dir.path().join("doomed.bin").exists());

    // Locked remove succeeds and deletes the file on disk.
    lock(&mut client, "alice", "doomed.bin", LockOp::Delete)
        .await
        .unwrap();
    let response = client
        .remove_file(RemoveFileRequest {
            client_id: "alice".to_string(),
            path: "doomed.bin".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(response.success);
    assert!(!dir.path().join("doomed.bin").exists());

    // A file that vanished underneath a held lock reports NotFound.
    lock(&mut client, "alice", "ghost.bin", LockOp::Write)
        .await
        .unwrap();
    std::fs::remove_file(dir.path().join("ghost.bin")).unwrap();
    let err = client
        .remove_file(RemoveFileRequest {
            client_id: "alice".to_string(),
            path: "ghost.bin".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn fetch_without_a_read_lock_fails_in_stream() {
    let (addr, _dir) = spawn_server().await;
    let mut client = connect(addr).await;

    store(&mut client, "alice", "guarded.bin", b"payload").await;

    let mut stream = client
        .fetch_file(FetchFileRequest {
            client_id: "bob".to_string(),
            path: "guarded.bin".to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    let err = stream.message().await.unwrap_err();
    assert_eq!(err.code(), Code::DataLoss);
}

#[tokio::test]
async fn empty_store_stream_is_rejected() {
    let (addr, _dir) = spawn_server().await;
    let mut client = connect(addr).await;

    let err = client
        .store_file(tokio_stream::iter(Vec::<FileChunk>::new()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn updates_fan_out_to_everyone_but_the_originator() {
    let (addr, _dir) = spawn_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    let mut carol = connect(addr).await;

    let mut alice_updates = alice
        .subscribe_updates(SubscribeRequest {
            client_id: "alice".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    let mut bob_updates = bob
        .subscribe_updates(SubscribeRequest {
            client_id: "bob".to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    store(&mut carol, "carol", "shared.bin", b"hello").await;

    for updates in [&mut alice_updates, &mut bob_updates] {
        let update = tokio::time::timeout(Duration::from_secs(5), updates.message())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.r#type(), UpdateType::Modified);
        let info = update.info.unwrap();
        assert_eq!(info.path, "shared.bin");
        assert!(update.version >= 1);
    }

    lock(&mut carol, "carol", "shared.bin", LockOp::Delete)
        .await
        .unwrap();
    carol
        .remove_file(RemoveFileRequest {
            client_id: "carol".to_string(),
            path: "shared.bin".to_string(),
        })
        .await
        .unwrap();

    let update = tokio::time::timeout(Duration::from_secs(5), bob_updates.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(update.r#type(), UpdateType::Deleted);
    assert_eq!(update.info.unwrap().path, "shared.bin");
}

#[tokio::test]
async fn originator_never_hears_its_own_change() {
    let (addr, _dir) = spawn_server().await;
    let mut alice = connect(addr).await;

    let mut updates = alice
        .subscribe_updates(SubscribeRequest {
            client_id: "alice".to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    store(&mut alice, "alice", "own.bin", b"mine").await;

    let echo = tokio::time::timeout(Duration::from_millis(300), updates.message()).await;
    assert!(echo.is_err(), "no self-notification expected");
}

#[tokio::test]
async fn duplicate_subscription_is_rejected_while_active() {
    let (addr, _dir) = spawn_server().await;
    let mut client = connect(addr).await;

    let _active = client
        .subscribe_updates(SubscribeRequest {
            client_id: "alice".to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    let err = client
        .subscribe_updates(SubscribeRequest {
            client_id: "alice".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
}
