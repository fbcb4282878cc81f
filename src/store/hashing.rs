//! Content hashing for index rows and derived-asset naming.

use blake3::Hasher;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::utils::config::HashingConsts;

/// Hash a file with blake3. Uses memory-mapped I/O for files above threshold,
/// chunked reading otherwise. Files below the small-file threshold are not
/// hashed; size + mtime decide for them.
pub fn hash_file(path: &Path, size: u64) -> Result<Option<[u8; 32]>> {
    if size < HashingConsts::SMALL_FILE_THRESHOLD {
        return Ok(None);
    }
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let mut hasher = Hasher::new();

    if size > HashingConsts::HASH_MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file).map_err(|e| EngineError::io(path, e))? };
        hasher.update(&mmap);
    } else {
        use std::io::Read;
        let mut reader =
            std::io::BufReader::with_capacity(HashingConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| EngineError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(Some(*hasher.finalize().as_bytes()))
}

/// Compare a fresh hash against a stored blob.
pub fn hash_equals(fresh: &Option<[u8; 32]>, stored: &Option<Vec<u8>>) -> bool {
    match (fresh, stored) {
        (None, None) => true,
        (Some(a), Some(b)) => a.as_slice() == b.as_slice(),
        _ => false,
    }
}
