//! Content-addressed blob store for raw evidence payloads.
//!
//! Blobs are keyed by sha256 and write-once: a second put of identical
//! bytes is a no-op that returns the existing path. Concurrent identical
//! writes are therefore idempotent.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem blob store keyed by content hash.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a blob store rooted at `root`, creating the directory if
    /// needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| Error::Storage(format!("blob root {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// Hash of a payload, hex-encoded.
    pub fn hash(payload: &[u8]) -> String {
        let digest = Sha256::digest(payload);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Store a payload, returning `(sha256, path)`. Existing blobs are
    /// left untouched.
    pub fn put(&self, payload: &[u8]) -> Result<(String, PathBuf)> {
        let hash = Self::hash(payload);
        let path = self.path_for(&hash);

        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("blob dir: {}", e)))?;
            }
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, payload).map_err(|e| Error::Storage(format!("blob write: {}", e)))?;
            fs::rename(&tmp, &path).map_err(|e| Error::Storage(format!("blob rename: {}", e)))?;
        }

        Ok((hash, path))
    }

    /// Read a payload by hash.
    pub fn get(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.path_for(hash);
        fs::read(&path).map_err(|_| Error::not_found("blob", hash))
    }

    /// True when a blob exists for the hash.
    pub fn contains(&self, hash: &str) -> bool {
        self.path_for(hash).exists()
    }

    // Two-level fan-out keeps directories small.
    fn path_for(&self, hash: &str) -> PathBuf {
        let prefix = if hash.len() >= 2 { &hash[..2] } else { "00" };
        self.root.join(prefix).join(hash)
    }
}
