//! Error types for the artifact cache

use std::fmt;
use std::sync::Arc;

/// Errors produced by the store, the fetcher, and (unchanged) by the engine.
///
/// Cloneable so one fetch outcome can be handed to every coalesced waiter.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Origin answered with something other than 200
    Origin { url: String, status: u16 },
    /// Connection, redirect, timeout, or body-read failure
    Transport(Arc<reqwest::Error>),
    /// Filesystem failure while staging, committing, or aborting
    Storage(Arc<std::io::Error>),
    /// No valid entry exists for the requested URL
    NotFound(String),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Origin { url, status } => {
                write!(f, "remote: {} returned status {}", url, status)
            }
            CacheError::Transport(err) => write!(f, "Transport error: {}", err),
            CacheError::Storage(err) => write!(f, "Storage error: {}", err),
            CacheError::NotFound(url) => write!(f, "Not cached: {}", url),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Transport(err) => Some(err.as_ref()),
            CacheError::Storage(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Transport(Arc::new(err))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
