//! Download-coalescing cache engine
//!
//! One lock guards the table of in-flight transfers together with the
//! existence check, so a caller either sees a committed entry, joins the
//! transfer already running for its key, or starts exactly one new transfer.
//! The transfer itself runs in its own task outside the lock; every caller,
//! including the one that started it, waits on a private oneshot receiver.
//! Dropping a caller's future only drops that receiver. A fetch that panics
//! is reported to the waiters as a failed transfer.

use crate::error::{CacheError, Result};
use crate::fetcher::Fetcher;
use crate::key::ResourceKey;
use crate::store::{ContentStore, EntryHandle};
use crate::types::{CacheStats, EntryMeta, DEFAULT_FILENAME};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

type Outcome = Result<()>;

/// How an `ensure_cached` call was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Entry already existed
    Hit,
    /// This call started the transfer
    Fetched,
    /// This call joined a transfer already in flight
    Joined,
}

/// Waiters for one in-flight transfer, in arrival order
#[derive(Default)]
struct Transfer {
    waiters: Vec<oneshot::Sender<Outcome>>,
}

struct EngineInner {
    store: ContentStore,
    fetcher: Arc<dyn Fetcher>,
    transfers: Mutex<HashMap<ResourceKey, Transfer>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

/// Cloneable handle to a shared engine
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

impl CacheEngine {
    pub fn new(store: ContentStore, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                fetcher,
                transfers: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.inner.store
    }

    /// Make sure `url` is present in the store, fetching it at most once
    /// across all concurrent callers.
    pub async fn ensure_cached(&self, url: &str, filename: &str) -> Result<CacheStatus> {
        let filename = if filename.is_empty() {
            DEFAULT_FILENAME
        } else {
            filename
        };
        let key = ResourceKey::from_url(url);

        let (receiver, started) = {
            let mut transfers = self.inner.transfers.lock().await;

            if self.inner.store.exists(&key).await {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                return Ok(CacheStatus::Hit);
            }

            let (sender, receiver) = oneshot::channel();
            match transfers.get_mut(&key) {
                Some(transfer) => {
                    transfer.waiters.push(sender);
                    self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                    (receiver, false)
                }
                None => {
                    transfers.insert(
                        key.clone(),
                        Transfer {
                            waiters: vec![sender],
                        },
                    );
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    (receiver, true)
                }
            }
        };

        if started {
            info!(url = %url, filename, "Download started");
            let inner = self.inner.clone();
            let url = url.to_string();
            let filename = filename.to_string();
            tokio::spawn(async move { inner.run_transfer(key, url, filename).await });
        } else {
            debug!(url = %url, filename, "Joined download in flight");
        }

        receiver
            .await
            .map_err(|_| CacheError::from(std::io::Error::other("transfer ended without result")))??;

        Ok(if started {
            CacheStatus::Fetched
        } else {
            CacheStatus::Joined
        })
    }

    /// Open the cached payload for `url`, refreshing its last-access time
    pub async fn open(&self, url: &str) -> Result<EntryHandle> {
        let key = ResourceKey::from_url(url);
        let handle = self
            .inner
            .store
            .read_handle(&key)
            .await
            .map_err(|e| match e {
                CacheError::NotFound(_) => CacheError::NotFound(url.to_string()),
                other => other,
            })?;

        if let Err(e) = self.inner.store.touch(&key).await {
            warn!(key = %key, error = %e, "Failed to refresh access time");
        }
        Ok(handle)
    }

    /// Number of transfers currently in flight
    pub async fn in_flight(&self) -> usize {
        self.inner.transfers.lock().await.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }
}

impl EngineInner {
    async fn run_transfer(self: Arc<Self>, key: ResourceKey, url: String, filename: String) {
        let worker = {
            let inner = self.clone();
            let (key, url, filename) = (key.clone(), url.clone(), filename.clone());
            tokio::spawn(async move { inner.fetch_and_commit(&key, &url, &filename).await })
        };

        let outcome = match worker.await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.store.discard(&key).await;
                Err(CacheError::from(std::io::Error::other(format!(
                    "transfer task failed: {}",
                    e
                ))))
            }
        };

        match &outcome {
            Ok(()) => info!(url = %url, filename = %filename, "Download finished"),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(url = %url, filename = %filename, error = %e, "Download failed");
            }
        }

        let mut transfers = self.transfers.lock().await;
        if let Some(transfer) = transfers.remove(&key) {
            for waiter in transfer.waiters {
                // A closed receiver belongs to a caller that stopped waiting
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    async fn fetch_and_commit(&self, key: &ResourceKey, url: &str, filename: &str) -> Outcome {
        let mut staging = self.store.begin_write(key).await?;

        let size = match self.fetcher.fetch(url, filename, &mut staging).await {
            Ok(size) => size,
            Err(e) => {
                self.store.abort(staging).await;
                return Err(e);
            }
        };

        let meta = EntryMeta {
            filename: filename.to_string(),
            size: size as i64,
            url: url.to_string(),
            time: Utc::now().timestamp(),
        };
        self.store.commit(staging, &meta).await
    }
}
