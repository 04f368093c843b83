//! Cache types

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Payload file name inside an entry directory
pub const PAYLOAD_FILE: &str = "cached.file";

/// Metadata file name inside an entry directory
pub const META_FILE: &str = "meta.json";

/// Display name used when a request carries no usable file name
pub const DEFAULT_FILENAME: &str = "cached.file";

/// Metadata record persisted as `meta.json` next to the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub filename: String,
    pub size: i64,
    pub url: String,
    /// Fetch time in Unix seconds
    pub time: i64,
}

impl EntryMeta {
    pub fn fetched_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.time, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Counters kept by the coalescing engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Requests answered from an existing entry
    pub hits: u64,
    /// Requests that started a fetch
    pub misses: u64,
    /// Requests that joined a fetch already in flight
    pub coalesced: u64,
    /// Fetches that ended in an error
    pub failures: u64,
}
