//! Per-path reader/writer locks with writer preference, and the
//! session-scoped file I/O that rides on them.
//!
//! Lock acquisition blocks the calling thread on a condition variable;
//! the gRPC layer hops onto the blocking pool before calling in. The
//! table-level mutex only guards map lookup and insertion, so operations
//! on unrelated paths never contend.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, warn};

/// Outcome of a remove attempt. The service maps each variant to a
/// distinct gRPC status so callers can tell "locked" from "gone".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    Locked,
    Error,
}

/// Open-handle, role-tagged binding between one client and one path for
/// the duration of a held lock. Only the creating client may use it.
struct FileSession {
    is_writer: bool,
    handle: File,
}

#[derive(Default)]
struct LockState {
    readers: u64,
    pending_writers: u64,
    has_writer: bool,
    sessions: HashMap<String, FileSession>,
}

struct FileLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl FileLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }
}

/// Registry of per-path locks and their active sessions.
///
/// Entries are created lazily on first access and never evicted; the
/// table grows with the number of distinct paths seen over the process
/// lifetime.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<PathBuf, Arc<FileLock>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, path: &Path) -> Arc<FileLock> {
        let mut table = self.locks.lock().unwrap();
        table
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(FileLock::new()))
            .clone()
    }

    fn get(&self, path: &Path) -> Option<Arc<FileLock>> {
        self.locks.lock().unwrap().get(path).cloned()
    }

    /// Acquire the write lock for `client_id` on `path`, blocking until no
    /// readers and no other writer hold it. Queued behind `pending_writers`
    /// so that new readers cannot starve a waiting writer.
    ///
    /// Opens (or, with `create`, creates) a read+write handle and records
    /// the session. Parent directories are created as needed; a failure
    /// there can race with concurrent deletion of the parent and is
    /// reported as a retryable `false`, not a panic.
    pub fn acquire_write(&self, client_id: &str, path: &Path, create: bool) -> bool {
        let fl = self.entry(path);
        let mut state = fl.state.lock().unwrap();

        state.pending_writers += 1;
        while state.readers != 0 || state.has_writer {
            state = fl.cond.wait(state).unwrap();
        }
        state.pending_writers -= 1;

        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(path = %path.display(), %err, "parent directory creation failed");
                fl.cond.notify_all();
                return false;
            }
        }

        let opened = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(handle) => Ok(handle),
            Err(_) if create => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path),
            Err(err) => Err(err),
        };

        let handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                debug!(path = %path.display(), %err, "write lock open failed");
                // A failed acquire must still wake readers queued behind
                // our pending_writers bump.
                fl.cond.notify_all();
                return false;
            }
        };

        state.has_writer = true;
        state.sessions.insert(
            client_id.to_string(),
            FileSession {
                is_writer: true,
                handle,
            },
        );
        true
    }

    /// Release `client_id`'s write session on `path` and wake all waiters.
    /// A no-op if no writer session exists for that client.
    pub fn release_write(&self, client_id: &str, path: &Path) {
        let Some(fl) = self.get(path) else { return };
        let mut state = fl.state.lock().unwrap();

        if state.sessions.get(client_id).is_some_and(|s| s.is_writer) {
            state.sessions.remove(client_id);
            state.has_writer = false;
            fl.cond.notify_all();
        }
    }

    /// Acquire a read lock, blocking while a writer holds the path or any
    /// writer is queued (writer preference). Fails if the target does not
    /// exist or cannot be opened read-only.
    pub fn acquire_read(&self, client_id: &str, path: &Path) -> bool {
        let fl = self.entry(path);
        let mut state = fl.state.lock().unwrap();

        while state.has_writer || state.pending_writers != 0 {
            state = fl.cond.wait(state).unwrap();
        }

        let handle = match File::open(path) {
            Ok(handle) => handle,
            Err(err) => {
                debug!(path = %path.display(), %err, "read lock open failed");
                return false;
            }
        };

        state.readers += 1;
        state.sessions.insert(
            client_id.to_string(),
            FileSession {
                is_writer: false,
                handle,
            },
        );
        true
    }

    /// Release `client_id`'s read session; wakes waiters when the reader
    /// count drops to zero.
    pub fn release_read(&self, client_id: &str, path: &Path) {
        let Some(fl) = self.get(path) else { return };
        let mut state = fl.state.lock().unwrap();

        if state.sessions.get(client_id).is_some_and(|s| !s.is_writer) {
            state.sessions.remove(client_id);
            state.readers -= 1;
            if state.readers == 0 {
                fl.cond.notify_all();
            }
        }
    }

    /// Write `data` at `offset` through `client_id`'s writer session.
    /// Fails immediately if no writer session exists; never acquires a
    /// lock implicitly. The write is synced to disk before returning so a
    /// crash after a successful call cannot lose the chunk.
    pub fn write_at(&self, client_id: &str, path: &Path, offset: u64, data: &[u8]) -> bool {
        let Some(fl) = self.get(path) else {
            return false;
        };
        let mut state = fl.state.lock().unwrap();
        let Some(session) = state.sessions.get_mut(client_id) else {
            return false;
        };
        if !session.is_writer {
            return false;
        }

        let result = session
            .handle
            .seek(SeekFrom::Start(offset))
            .and_then(|_| session.handle.write_all(data))
            .and_then(|_| session.handle.sync_data());

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %path.display(), offset, %err, "chunk write failed");
                false
            }
        }
    }

    /// Read up to `buf.len()` bytes at `offset` through `client_id`'s
    /// reader session. Returns the number of bytes read (0 at EOF), or
    /// `None` if no reader session exists or the read fails.
    pub fn read_at(
        &self,
        client_id: &str,
        path: &Path,
        offset: u64,
        buf: &mut [u8],
    ) -> Option<usize> {
        let fl = self.get(path)?;
        let mut state = fl.state.lock().unwrap();
        let session = state.sessions.get_mut(client_id)?;
        if session.is_writer {
            return None;
        }

        if let Err(err) = session.handle.seek(SeekFrom::Start(offset)) {
            warn!(path = %path.display(), offset, %err, "chunk seek failed");
            return None;
        }

        let mut total = 0;
        while total < buf.len() {
            match session.handle.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(path = %path.display(), offset, %err, "chunk read failed");
                    return None;
                }
            }
        }
        Some(total)
    }

    /// Remove the file at `path`. Requires `client_id` to hold the
    /// delete-class write session and no readers to be active. On success
    /// all sessions are cleared and waiters are woken.
    ///
    /// The lock entry stays in the table: parked waiters hold an `Arc` to
    /// it, and dropping it would let them acquire an orphaned lock while a
    /// fresh caller acquires a new entry for the same path. A writer
    /// queued with `create` behind the remove recreates the file through
    /// its own session, which is the remove-then-store serialization.
    pub fn remove(&self, client_id: &str, path: &Path) -> RemoveOutcome {
        let Some(fl) = self.get(path) else {
            return RemoveOutcome::Locked;
        };
        let mut state = fl.state.lock().unwrap();

        if !state.sessions.get(client_id).is_some_and(|s| s.is_writer) {
            return RemoveOutcome::Locked;
        }
        if state.readers > 0 {
            return RemoveOutcome::Locked;
        }

        state.sessions.clear();
        state.has_writer = false;
        fl.cond.notify_all();

        if !path.exists() {
            return RemoveOutcome::NotFound;
        }

        match fs::remove_file(path) {
            Ok(()) => RemoveOutcome::Removed,
            Err(err) => {
                warn!(path = %path.display(), %err, "file removal failed");
                RemoveOutcome::Error
            }
        }
    }

    /// Drop every lock entry. Test teardown only; waiters parked on a
    /// dropped entry are not woken.
    pub fn release_all(&self) {
        self.locks.lock().unwrap().clear();
    }
}
