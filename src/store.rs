//! # Object Store
//!
//! Durable blob storage addressed by key. The board keeps exactly one object in it,
//! [`COMMENTS_KEY`], holding the whole comment list as a JSON array.
//!
//! ## Conditional Writes
//!
//! The store has no partial update primitive, so every mutation is a full
//! read-modify-write. To keep two writers from silently discarding each other's
//! change, every `put` carries a [`Precondition`]:
//!
//! - [`Precondition::Absent`]: the object must not exist yet
//! - [`Precondition::Matches`]: the object's current ETag must equal the given one
//!
//! A write whose precondition no longer holds fails with
//! [`StoreError::PreconditionFailed`] and the caller re-reads.
//!
//! ETags are the hex SHA-256 of the stored bytes, so equal content yields equal tags
//! across restarts and backends.
//!
//! ## Backends
//!
//! - [`FsStore`]: one file per key under a data directory, written via temp file + rename
//! - [`MemoryStore`]: a map behind a lock, for tests and throwaway deployments
use std::{
    collections::HashMap,
    future::Future,
    io,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
    time::timeout,
};
use tracing::{debug, warn};

pub const COMMENTS_KEY: &str = "comments.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Object store timed out after {0:?}")]
    Timeout(Duration),

    #[error("Precondition failed for {0}")]
    PreconditionFailed(String),

    #[error("Stored object {key} is not a valid comment list: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Absent,
    Matches(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Replaces the whole object if `precondition` holds and returns the new ETag.
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        precondition: Precondition,
    ) -> Result<String, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Fs,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fs" | "file" | "filesystem" => Ok(Self::Fs),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

pub fn open_store(
    backend: StoreBackend,
    data_dir: &Path,
) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match backend {
        StoreBackend::Fs => Ok(Arc::new(FsStore::new(data_dir.to_path_buf())?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::default())),
    }
}

pub fn compute_etag(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Bounds a store call; an elapsed limit is reported as [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    timeout(limit, operation)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

fn check_precondition(
    key: &str,
    current_etag: Option<&str>,
    precondition: &Precondition,
) -> Result<(), StoreError> {
    let holds = match (precondition, current_etag) {
        (Precondition::Absent, None) => true,
        (Precondition::Matches(expected), Some(actual)) => expected == actual,
        _ => false,
    };

    if holds {
        Ok(())
    } else {
        Err(StoreError::PreconditionFailed(key.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let objects = self.objects.read().await;

        Ok(objects.get(key).map(|body| StoredObject {
            etag: compute_etag(body),
            body: body.clone(),
        }))
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        precondition: Precondition,
    ) -> Result<String, StoreError> {
        let mut objects = self.objects.write().await;

        let current = objects.get(key).map(|existing| compute_etag(existing));
        check_precondition(key, current.as_deref(), &precondition)?;

        let etag = compute_etag(&body);
        objects.insert(key.to_string(), body);

        Ok(etag)
    }
}

pub struct FsStore {
    base_path: PathBuf,
    // compare-and-rename must not interleave within this process
    write_lock: Mutex<()>,
}

impl FsStore {
    pub fn new(base_path: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        Ok(self.base_path.join(key))
    }

    async fn read(&self, path: &Path) -> Result<Option<Bytes>, StoreError> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Removes a half-written temp file when `put` errors out or its future is
/// dropped before the rename.
struct TempPath {
    path: PathBuf,
    armed: bool,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed abandoned {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.path.display()),
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let path = self.object_path(key)?;

        Ok(self.read(&path).await?.map(|body| StoredObject {
            etag: compute_etag(&body),
            body,
        }))
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        precondition: Precondition,
    ) -> Result<String, StoreError> {
        let path = self.object_path(key)?;
        let _guard = self.write_lock.lock().await;

        let current = self.read(&path).await?.map(|existing| compute_etag(&existing));
        check_precondition(key, current.as_deref(), &precondition)?;

        let tmp = TempPath::new(path.with_extension(format!("{}.tmp", ulid::Ulid::new())));
        let mut file = fs::File::create(tmp.path()).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(tmp.path(), &path).await?;
        tmp.disarm();
        debug!("Wrote {} bytes to {}", body.len(), path.display());

        Ok(compute_etag(&body))
    }
}
