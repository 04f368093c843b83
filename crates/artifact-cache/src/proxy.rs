//! Upstream proxy selection

use async_trait::async_trait;

/// Supplies the proxy endpoint for an outbound fetch.
///
/// Called once per fetch, immediately before the request is sent, so an
/// implementation may return a different endpoint every time.
#[async_trait]
pub trait ProxyResolver: Send + Sync {
    async fn resolve(&self) -> Option<String>;
}

/// Always returns the same endpoint
#[derive(Debug, Clone)]
pub struct StaticProxy(pub String);

#[async_trait]
impl ProxyResolver for StaticProxy {
    async fn resolve(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Accept only plain `http://` proxy endpoints
pub fn is_valid_proxy(endpoint: &str) -> bool {
    endpoint.starts_with("http://")
}
