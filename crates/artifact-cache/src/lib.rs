//! Download-coalescing cache for release artifacts
//!
//! Fetches each origin URL at most once across concurrent callers, publishes
//! it atomically into a content-addressed directory tree, tracks transfers in
//! flight, and evicts entries that have not been read for a retention window.

pub mod engine;
pub mod error;
pub mod fetcher;
pub mod key;
pub mod progress;
pub mod proxy;
pub mod store;
pub mod sweeper;
pub mod types;

pub use engine::{CacheEngine, CacheStatus};
pub use error::{CacheError, Result};
pub use fetcher::{Fetcher, FetcherConfig, HttpFetcher};
pub use key::ResourceKey;
pub use progress::{ProgressGuard, ProgressRegistry, ProgressSnapshot};
pub use proxy::{ProxyResolver, StaticProxy};
pub use store::{ContentStore, EntryHandle, Staging};
pub use sweeper::{spawn_sweeper, sweep, SweepReport};
pub use types::{CacheStats, EntryMeta, DEFAULT_FILENAME};
