use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Block size for streaming digest computation.
const HASH_BLOCK_SIZE: usize = 32 * 1024;

/// Compute the hex-encoded SHA-256 digest of a file's contents.
///
/// Streams the file in fixed-size blocks so large files are never loaded
/// whole. Used for change-event payloads and equality checks, never for
/// locking decisions.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
