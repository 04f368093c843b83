//! Registry of in-progress transfers

use crate::key::ResourceKey;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct TransferProgress {
    url: String,
    filename: String,
    copied: AtomicU64,
    total: u64,
}

/// Point-in-time view of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub url: String,
    pub filename: String,
    pub bytes_copied: u64,
    /// Zero when the origin sent no length
    pub total_bytes: u64,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_copied as f64 * 100.0 / self.total_bytes as f64
    }
}

/// Shared table of transfers, keyed by resource key.
///
/// Cloning yields another handle to the same table.
#[derive(Debug, Clone, Default)]
pub struct ProgressRegistry {
    transfers: Arc<RwLock<HashMap<ResourceKey, Arc<TransferProgress>>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer. The record is removed when the returned guard drops.
    pub fn begin(&self, key: ResourceKey, url: &str, filename: &str, total: u64) -> ProgressGuard {
        let record = Arc::new(TransferProgress {
            url: url.to_string(),
            filename: filename.to_string(),
            copied: AtomicU64::new(0),
            total,
        });
        self.transfers.write().insert(key.clone(), record.clone());
        ProgressGuard {
            registry: self.clone(),
            key,
            record,
        }
    }

    pub fn len(&self) -> usize {
        self.transfers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.read().is_empty()
    }

    /// Current transfers ordered by URL
    pub fn snapshot(&self) -> Vec<ProgressSnapshot> {
        let mut items: Vec<ProgressSnapshot> = self
            .transfers
            .read()
            .values()
            .map(|p| ProgressSnapshot {
                url: p.url.clone(),
                filename: p.filename.clone(),
                bytes_copied: p.copied.load(Ordering::Relaxed),
                total_bytes: p.total,
            })
            .collect();
        items.sort_by(|a, b| a.url.cmp(&b.url));
        items
    }
}

/// Write handle for one transfer's progress record
#[derive(Debug)]
pub struct ProgressGuard {
    registry: ProgressRegistry,
    key: ResourceKey,
    record: Arc<TransferProgress>,
}

impl ProgressGuard {
    pub fn add(&self, bytes: u64) {
        self.record.copied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn copied(&self) -> u64 {
        self.record.copied.load(Ordering::Relaxed)
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        let mut transfers = self.registry.transfers.write();
        // Only remove our own record
        if transfers
            .get(&self.key)
            .is_some_and(|r| Arc::ptr_eq(r, &self.record))
        {
            transfers.remove(&self.key);
        }
    }
}
