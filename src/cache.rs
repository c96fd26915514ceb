//! Asset Cache - Content-Addressed, At-Most-Once
//!
//! Keys are SHA-256 digests over an asset kind and its full parameter set.
//! Entries are immutable: published by write-temp-then-rename, verified by
//! checksum on every read, and superseded only after a read finds them corrupt.
//!
//! Generation happens at most once per key. Callers in the same process queue
//! on a per-key mutex; callers in other processes queue on a per-key lock file.
//! Whoever gets the lock second re-reads the store and finds the entry.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use fs2::FileExt;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::hashing::{is_digest, sha256_hex};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Asset generation failed for {key}: {source}")]
    Generation {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Cache key derivation failed: {0}")]
    Key(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

const ENTRY_MAGIC: &[u8] = b"EXPC1\n";
const DIGEST_LEN: usize = 64;

/// One stored asset: key, payload, and the payload's checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetCacheEntry {
    pub key: String,
    pub checksum: String,
    pub payload: Vec<u8>,
}

impl AssetCacheEntry {
    pub fn new(key: &str, payload: Vec<u8>) -> Self {
        Self {
            key: key.to_string(),
            checksum: sha256_hex(&payload),
            payload,
        }
    }

    /// `EXPC1\n<key>\n<checksum>\n<payload>`
    pub fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(ENTRY_MAGIC.len() + 2 * (DIGEST_LEN + 1) + self.payload.len());
        blob.extend_from_slice(ENTRY_MAGIC);
        blob.extend_from_slice(self.key.as_bytes());
        blob.push(b'\n');
        blob.extend_from_slice(self.checksum.as_bytes());
        blob.push(b'\n');
        blob.extend_from_slice(&self.payload);
        blob
    }

    /// Parse and verify a stored blob. Any mismatch is corruption.
    pub fn decode(key: &str, blob: &[u8]) -> Result<Self, CacheError> {
        let corrupt = |reason: &str| CacheError::Corrupt {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let rest = blob.strip_prefix(ENTRY_MAGIC).ok_or_else(|| corrupt("bad header"))?;
        if rest.len() < 2 * (DIGEST_LEN + 1) {
            return Err(corrupt("truncated header"));
        }
        let (stored_key, rest) = rest.split_at(DIGEST_LEN);
        let rest = rest.strip_prefix(b"\n").ok_or_else(|| corrupt("bad header"))?;
        let (checksum, rest) = rest.split_at(DIGEST_LEN);
        let payload = rest.strip_prefix(b"\n").ok_or_else(|| corrupt("bad header"))?;

        if stored_key != key.as_bytes() {
            return Err(corrupt("key mismatch"));
        }
        let checksum = std::str::from_utf8(checksum).map_err(|_| corrupt("bad checksum"))?;
        if sha256_hex(payload) != checksum {
            return Err(corrupt("checksum mismatch"));
        }

        Ok(Self {
            key: key.to_string(),
            checksum: checksum.to_string(),
            payload: payload.to_vec(),
        })
    }
}

/// Exclusive per-key lock. Released on drop.
pub struct KeyLock {
    _file: Option<File>,
}

impl KeyLock {
    /// No cross-process exclusion; the in-process mutex is enough.
    pub fn in_process() -> Self {
        Self { _file: None }
    }
}

/// Key -> immutable blob storage.
pub trait BlobStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Publish a blob. Readers observe either nothing or the complete blob.
    fn write(&self, key: &str, blob: &[u8]) -> Result<(), CacheError>;

    fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry, returning how many were removed.
    fn clear(&self) -> Result<usize, CacheError>;

    /// Block until this caller holds the exclusive lock for `key`.
    fn lock(&self, key: &str) -> Result<KeyLock, CacheError>;
}

/// Flat directory store: `<key>.blob` entries and `<key>.lock` lock files.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_error(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.blob"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.lock"))
    }
}

impl BlobStore for FsBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    fn write(&self, key: &str, blob: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(io_error(&self.root))?;
        tmp.write_all(blob).map_err(io_error(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_error(&path))?;
        tmp.persist(&path).map_err(|e| io_error(&path)(e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root).map_err(io_error(&self.root))? {
            let path = entry.map_err(io_error(&self.root))?.path();
            if path.extension().map_or(false, |e| e == "blob") {
                fs::remove_file(&path).map_err(io_error(&path))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn lock(&self, key: &str) -> Result<KeyLock, CacheError> {
        let path = self.lock_path(key);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_error(&path))?;
        file.lock_exclusive().map_err(io_error(&path))?;
        Ok(KeyLock { _file: Some(file) })
    }
}

/// In-memory store for tests and one-shot builds.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(key).cloned())
    }

    fn write(&self, key: &str, blob: &[u8]) -> Result<(), CacheError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = blobs.len();
        blobs.clear();
        Ok(removed)
    }

    fn lock(&self, _key: &str) -> Result<KeyLock, CacheError> {
        Ok(KeyLock::in_process())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub generations: u64,
    pub corruptions: u64,
}

/// Memoizes generated assets over a [`BlobStore`].
pub struct AssetCache {
    store: Box<dyn BlobStore>,
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    generations: AtomicU64,
    corruptions: AtomicU64,
}

impl AssetCache {
    pub fn new(store: impl BlobStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
        }
    }

    /// File-backed cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Ok(Self::new(FsBlobStore::open(dir)?))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBlobStore::new())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::SeqCst),
            generations: self.generations.load(Ordering::SeqCst),
            corruptions: self.corruptions.load(Ordering::SeqCst),
        }
    }

    /// True when a verified entry exists for `key`.
    pub fn contains(&self, key: &str) -> Result<bool, CacheError> {
        check_key(key)?;
        Ok(self.read_verified(key, false)?.is_some())
    }

    pub fn clear(&self) -> Result<usize, CacheError> {
        let removed = self.store.clear()?;
        tracing::info!(removed, "asset cache cleared");
        Ok(removed)
    }

    /// Return the payload stored under `key`, running `generator` only if no
    /// valid entry exists.
    ///
    /// A corrupt entry is regenerated once. If that generation or its write
    /// fails too, the error is returned.
    pub fn get_or_create<F, E>(&self, key: &str, generator: F) -> Result<Vec<u8>, CacheError>
    where
        F: FnOnce() -> Result<Vec<u8>, E>,
        E: Into<BoxError>,
    {
        check_key(key)?;

        if let Some(payload) = self.read_verified(key, false)? {
            self.hits.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(key, "asset cache hit");
            return Ok(payload);
        }

        let slot = self.slot(key);
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = self.store.lock(key)?;

        // Another caller may have published while we waited.
        if let Some(payload) = self.read_verified(key, true)? {
            self.hits.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(key, "asset cache hit after wait");
            return Ok(payload);
        }

        let payload = generator().map_err(|source| CacheError::Generation {
            key: key.to_string(),
            source: source.into(),
        })?;
        let entry = AssetCacheEntry::new(key, payload);
        let blob = entry.encode();

        if let Err(first) = self.store.write(key, &blob) {
            tracing::warn!(key, error = %first, "cache write failed, retrying once");
            self.store.write(key, &blob)?;
        }

        self.generations.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(key, bytes = entry.payload.len(), "asset generated");
        Ok(entry.payload)
    }

    /// Read and verify. With `repair`, the caller holds the key lock and a
    /// corrupt entry is removed so it can be regenerated.
    fn read_verified(&self, key: &str, repair: bool) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(blob) = self.store.read(key)? else {
            return Ok(None);
        };
        match AssetCacheEntry::decode(key, &blob) {
            Ok(entry) => Ok(Some(entry.payload)),
            Err(err) => {
                if repair {
                    self.corruptions.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(key, error = %err, "corrupt cache entry, regenerating");
                    self.store.remove(key)?;
                }
                Ok(None)
            }
        }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.to_string()).or_default().clone()
    }
}

fn check_key(key: &str) -> Result<(), CacheError> {
    if is_digest(key) {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}
