//! Response types for the release mirror

use artifact_cache::CacheStats;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    /// Downloads currently running
    pub in_flight: usize,
    /// Downloads that have started receiving a body
    pub downloading: usize,
    pub cache: CacheStats,
}
