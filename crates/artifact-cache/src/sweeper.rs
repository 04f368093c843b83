//! Age-based eviction of cache entries
//!
//! An entry's age is measured from the modification time of its `meta.json`,
//! which every read refreshes.

use crate::store::{ContentStore, STAGING_SUFFIX};
use crate::types::META_FILE;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: usize,
    pub kept: usize,
    pub staging_removed: usize,
    pub errors: usize,
}

/// Remove every entry not accessed within `retention`
pub async fn sweep(store: &ContentStore, retention: Duration) -> SweepReport {
    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    sweep_older_than(store, cutoff).await
}

/// Remove every entry last accessed before `cutoff`, plus stale staging files
pub async fn sweep_older_than(store: &ContentStore, cutoff: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();

    let mut shards = match fs::read_dir(store.root()).await {
        Ok(shards) => shards,
        Err(e) => {
            warn!(root = ?store.root(), error = %e, "Cannot read cache root");
            report.errors += 1;
            return report;
        }
    };

    loop {
        let item = match shards.next_entry().await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to list cache root");
                report.errors += 1;
                break;
            }
        };
        let path = item.path();
        let file_type = match item.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!(path = ?path, error = %e, "Skipping unreadable path");
                report.errors += 1;
                continue;
            }
        };

        if file_type.is_dir() {
            sweep_shard(&path, cutoff, &mut report).await;
        } else if file_type.is_file() && is_staging_file(&path) {
            match remove_if_stale(&path, cutoff).await {
                Ok(true) => report.staging_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to clean staging file");
                    report.errors += 1;
                }
            }
        }
    }

    report
}

async fn sweep_shard(shard: &Path, cutoff: SystemTime, report: &mut SweepReport) {
    let mut entries = match fs::read_dir(shard).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = ?shard, error = %e, "Skipping unreadable shard");
            report.errors += 1;
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(path = ?shard, error = %e, "Failed to list shard");
                report.errors += 1;
                break;
            }
        };

        let dir = entry.path();
        let meta = dir.join(META_FILE);
        let modified = match fs::metadata(&meta).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            // Not an entry, or a commit still in progress
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = ?meta, error = %e, "Skipping unreadable entry");
                report.errors += 1;
                continue;
            }
        };

        if modified >= cutoff {
            report.kept += 1;
            continue;
        }

        let idle = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(path = ?dir, idle_secs = idle.as_secs(), "Evicted cache entry");
                report.removed += 1;
            }
            Err(e) => {
                warn!(path = ?dir, error = %e, "Failed to evict cache entry");
                report.errors += 1;
            }
        }
    }
}

fn is_staging_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(STAGING_SUFFIX))
}

async fn remove_if_stale(path: &Path, cutoff: SystemTime) -> std::io::Result<bool> {
    let modified = fs::metadata(path).await?.modified()?;
    if modified >= cutoff {
        return Ok(false);
    }
    fs::remove_file(path).await?;
    debug!(path = ?path, "Removed stale staging file");
    Ok(true)
}

/// Run a sweep immediately and then once every `every`
pub fn spawn_sweeper(store: ContentStore, retention: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            let report = sweep(&store, retention).await;
            info!(
                removed = report.removed,
                kept = report.kept,
                staging_removed = report.staging_removed,
                errors = report.errors,
                "Sweep finished"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ResourceKey;
    use crate::types::EntryMeta;
    use tempfile::tempdir;

    async fn commit(store: &ContentStore, url: &str) -> ResourceKey {
        let key = ResourceKey::from_url(url);
        let mut staging = store.begin_write(&key).await.unwrap();
        staging.write_chunk(b"bytes").await.unwrap();
        let meta = EntryMeta {
            filename: "f".to_string(),
            size: 5,
            url: url.to_string(),
            time: 0,
        };
        store.commit(staging, &meta).await.unwrap();
        key
    }

    fn ago(secs: u64) -> SystemTime {
        SystemTime::now() - Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_recent_touch_survives_sweep() {
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        store.init().await.unwrap();

        // Last read 2s ago
        let touched = commit(&store, "https://x/touched").await;
        store.touch_at(&touched, ago(2)).await.unwrap();

        // Last read 7s ago
        let idle = commit(&store, "https://x/idle").await;
        store.touch_at(&idle, ago(7)).await.unwrap();

        let report = sweep(&store, Duration::from_secs(3)).await;

        assert!(store.exists(&touched).await);
        assert!(!store.exists(&idle).await);
        assert!(!store.entry_dir(&idle).exists());
        assert_eq!(report.removed, 1);
        assert_eq!(report.kept, 1);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_staging_files_only() {
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        store.init().await.unwrap();

        let stale = dir.path().join("0123.tmp");
        std::fs::write(&stale, b"partial").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(ago(100))
            .unwrap();
        let fresh = dir.path().join("4567.tmp");
        std::fs::write(&fresh, b"partial").unwrap();
        let unrelated = dir.path().join("notes.txt");
        std::fs::write(&unrelated, b"keep").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&unrelated)
            .unwrap()
            .set_modified(ago(100))
            .unwrap();

        let report = sweep(&store, Duration::from_secs(10)).await;

        assert_eq!(report.staging_removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }

    #[tokio::test]
    async fn test_sweep_skips_directories_without_metadata() {
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        store.init().await.unwrap();

        let orphan = dir.path().join("ab").join("cdef");
        std::fs::create_dir_all(&orphan).unwrap();
        let kept = commit(&store, "https://x/kept").await;

        let report = sweep(&store, Duration::from_secs(3600)).await;

        assert!(orphan.exists());
        assert!(store.exists(&kept).await);
        assert_eq!(report.removed, 0);
        assert_eq!(report.kept, 1);
    }

    #[tokio::test]
    async fn test_sweep_missing_root_reports_error() {
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("absent"));

        let report = sweep(&store, Duration::from_secs(1)).await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.removed, 0);
    }
}
