//! Resource keys derived from origin URLs

use md5::{Digest, Md5};
use std::fmt;

/// Deterministic 128-bit identifier for an origin URL.
///
/// Rendered as 32 lowercase hex characters. The first two characters name the
/// shard directory and the rest name the entry directory inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Derive the key for an origin URL. The URL is hashed as-is, query string included.
    pub fn from_url(url: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(url.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard directory name
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }

    /// Entry directory name inside the shard
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
