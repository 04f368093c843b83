//! Content-addressed on-disk store
//!
//! Layout: `<root>/<key[0..2]>/<key[2..]>/cached.file` with a sibling
//! `meta.json`. Payloads are staged at `<root>/<key>.tmp` and published with a
//! single rename; metadata is written last, so an entry directory without a
//! readable `meta.json` is treated as absent.

use crate::error::{CacheError, Result};
use crate::key::ResourceKey;
use crate::types::{EntryMeta, META_FILE, PAYLOAD_FILE};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Suffix of staging files in the store root
pub const STAGING_SUFFIX: &str = ".tmp";

/// Filesystem-backed store of cache entries
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

/// A payload being written, not yet visible to readers
#[derive(Debug)]
pub struct Staging {
    key: ResourceKey,
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl Staging {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append a chunk to the staged payload
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            CacheError::from(std::io::Error::other("staging file already closed"))
        })?;
        file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

/// An opened payload together with its metadata
#[derive(Debug)]
pub struct EntryHandle {
    pub meta: EntryMeta,
    pub path: PathBuf,
    pub file: File,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the store root exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!(root = ?self.root, "Store initialized");
        Ok(())
    }

    pub fn entry_dir(&self, key: &ResourceKey) -> PathBuf {
        self.root.join(key.shard()).join(key.remainder())
    }

    fn meta_path(&self, key: &ResourceKey) -> PathBuf {
        self.entry_dir(key).join(META_FILE)
    }

    fn payload_path(&self, key: &ResourceKey) -> PathBuf {
        self.entry_dir(key).join(PAYLOAD_FILE)
    }

    fn staging_path(&self, key: &ResourceKey) -> PathBuf {
        self.root.join(format!("{}{}", key, STAGING_SUFFIX))
    }

    /// True iff the entry has a readable metadata record
    pub async fn exists(&self, key: &ResourceKey) -> bool {
        self.read_meta(key).await.is_ok()
    }

    /// Read and parse the metadata record of an entry
    pub async fn read_meta(&self, key: &ResourceKey) -> Result<EntryMeta> {
        let data = match fs::read(self.meta_path(key)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data).map_err(|e| {
            warn!(key = %key, error = %e, "Invalid metadata record");
            CacheError::NotFound(key.to_string())
        })
    }

    /// Open the payload of an entry for reading
    pub async fn read_handle(&self, key: &ResourceKey) -> Result<EntryHandle> {
        let meta = self.read_meta(key).await?;
        let path = self.payload_path(key);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(EntryHandle { meta, path, file })
    }

    /// Allocate a staging file for a new payload
    pub async fn begin_write(&self, key: &ResourceKey) -> Result<Staging> {
        let path = self.staging_path(key);
        let file = File::create(&path).await?;
        debug!(key = %key, path = ?path, "Staging file created");
        Ok(Staging {
            key: key.clone(),
            path,
            file: Some(file),
            written: 0,
        })
    }

    /// Publish a staged payload, then its metadata record.
    ///
    /// On failure the staging file and any partial entry are removed.
    pub async fn commit(&self, mut staging: Staging, meta: &EntryMeta) -> Result<()> {
        match self.publish(&mut staging, meta).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(key = %staging.key, error = %e, "Commit failed");
                self.abort(staging).await;
                Err(e)
            }
        }
    }

    async fn publish(&self, staging: &mut Staging, meta: &EntryMeta) -> Result<()> {
        staging.finish().await?;

        let dir = self.entry_dir(&staging.key);
        fs::create_dir_all(&dir).await?;
        fs::rename(&staging.path, dir.join(PAYLOAD_FILE)).await?;

        let data = serde_json::to_vec(meta).map_err(std::io::Error::from)?;
        let meta_tmp = dir.join(format!("{}{}", META_FILE, STAGING_SUFFIX));
        fs::write(&meta_tmp, data).await?;
        fs::rename(&meta_tmp, dir.join(META_FILE)).await?;

        debug!(key = %staging.key, size = meta.size, "Entry committed");
        Ok(())
    }

    /// Discard a staged payload and any partially published entry
    pub async fn abort(&self, mut staging: Staging) {
        drop(staging.file.take());
        self.discard(&staging.key).await;
    }

    /// Remove the staging file and any partial entry for `key`, for transfers
    /// whose [`Staging`] handle was lost. A committed entry is left alone.
    pub async fn discard(&self, key: &ResourceKey) {
        let path = self.staging_path(key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove staging file");
            }
        }

        if self.exists(key).await {
            return;
        }
        if let Err(e) = fs::remove_dir_all(self.entry_dir(key)).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to remove partial entry");
            }
        }
    }

    /// Mark an entry as accessed now
    pub async fn touch(&self, key: &ResourceKey) -> Result<()> {
        self.touch_at(key, SystemTime::now()).await
    }

    /// Set the last-access time of an entry
    pub async fn touch_at(&self, key: &ResourceKey, at: SystemTime) -> Result<()> {
        let path = self.meta_path(key);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::options().write(true).open(&path)?;
            file.set_modified(at)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(())
    }

    /// Last-access time of an entry
    pub async fn last_access(&self, key: &ResourceKey) -> Result<SystemTime> {
        Ok(fs::metadata(self.meta_path(key)).await?.modified()?)
    }

    /// Remove an entry entirely
    pub async fn remove(&self, key: &ResourceKey) -> Result<()> {
        match fs::remove_dir_all(self.entry_dir(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
