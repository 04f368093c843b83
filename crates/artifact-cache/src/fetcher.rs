//! Outbound transfers from origin into staging

use crate::error::{CacheError, Result};
use crate::progress::ProgressRegistry;
use crate::proxy::{is_valid_proxy, ProxyResolver};
use crate::store::Staging;
use async_trait::async_trait;
use reqwest::{redirect, Client, ClientBuilder, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Performs one transfer of an origin URL into a staging file
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `url` into `staging`, returning the number of bytes written
    async fn fetch(&self, url: &str, filename: &str, staging: &mut Staging) -> Result<u64>;
}

/// Transport settings for [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Whole-transfer timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60 * 60),
            connect_timeout: Duration::from_secs(30),
            max_redirects: 10,
            user_agent: concat!("artifact-cache/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetcher backed by reqwest
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
    proxy: Option<Arc<dyn ProxyResolver>>,
    progress: ProgressRegistry,
}

impl HttpFetcher {
    /// Create a fetcher with default transport settings
    pub fn new(progress: ProgressRegistry) -> Result<Self> {
        Self::with_config(FetcherConfig::default(), progress)
    }

    pub fn with_config(config: FetcherConfig, progress: ProgressRegistry) -> Result<Self> {
        let client = client_builder(&config).build()?;
        Ok(Self {
            client,
            config,
            proxy: None,
            progress,
        })
    }

    /// Consult `resolver` for a proxy before every fetch
    pub fn with_proxy(mut self, resolver: Arc<dyn ProxyResolver>) -> Self {
        self.proxy = Some(resolver);
        self
    }

    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    /// Client for the next request, routed through the resolved proxy if valid
    async fn client_for_request(&self) -> Result<Client> {
        let Some(resolver) = &self.proxy else {
            return Ok(self.client.clone());
        };

        match resolver.resolve().await {
            Some(endpoint) if is_valid_proxy(&endpoint) => match reqwest::Proxy::all(&endpoint) {
                Ok(proxy) => {
                    debug!(proxy = %endpoint, "Using upstream proxy");
                    Ok(client_builder(&self.config).proxy(proxy).build()?)
                }
                Err(e) => {
                    warn!(proxy = %endpoint, error = %e, "Unusable proxy, connecting direct");
                    Ok(self.client.clone())
                }
            },
            Some(endpoint) => {
                warn!(proxy = ?endpoint, "Invalid proxy, must start with http://");
                Ok(self.client.clone())
            }
            None => Ok(self.client.clone()),
        }
    }
}

fn client_builder(config: &FetcherConfig) -> ClientBuilder {
    Client::builder()
        .redirect(redirect::Policy::limited(config.max_redirects))
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.clone())
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, filename: &str, staging: &mut Staging) -> Result<u64> {
        let client = self.client_for_request().await?;
        let mut response = client.get(url).send().await?;

        let status = response.status();
        debug!(url = %url, status = %status, "Origin responded");
        if status != StatusCode::OK {
            return Err(CacheError::Origin {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length().unwrap_or_else(|| {
            warn!(url = %url, "Content length unknown");
            0
        });

        let progress = self
            .progress
            .begin(staging.key().clone(), url, filename, total);

        while let Some(chunk) = response.chunk().await? {
            staging.write_chunk(&chunk).await?;
            progress.add(chunk.len() as u64);
        }

        debug!(url = %url, bytes = progress.copied(), "Transfer complete");
        Ok(staging.bytes_written())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ResourceKey;
    use crate::progress::ProgressSnapshot;
    use crate::store::ContentStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingProxy {
        endpoint: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProxyResolver for CountingProxy {
        async fn resolve(&self) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(self.endpoint.clone())
        }
    }

    /// One-shot origin that writes `head` and `first`, pauses, then writes
    /// `rest` and closes the connection
    async fn paced_origin(head: &str, first: &[u8], rest: &[u8], pause: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (head, first, rest) = (head.to_string(), first.to_vec(), rest.to_vec());

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&first).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(pause).await;
            let _ = socket.write_all(&rest).await;
        });

        format!("http://{}/artifact.bin", addr)
    }

    /// Poll the registry until a transfer has copied at least one byte
    async fn wait_for_progress(registry: &ProgressRegistry) -> ProgressSnapshot {
        for _ in 0..200 {
            if let Some(snapshot) = registry
                .snapshot()
                .into_iter()
                .find(|s| s.bytes_copied > 0)
            {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no transfer progress observed");
    }

    async fn staging_for(store: &ContentStore, url: &str) -> Staging {
        store.init().await.unwrap();
        store.begin_write(&ResourceKey::from_url(url)).await.unwrap()
    }

    #[tokio::test]
    async fn test_fetch_streams_body_into_staging() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases/tool.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let url = format!("{}/releases/tool.tar.gz", mock_server.uri());
        let mut staging = staging_for(&store, &url).await;

        let registry = ProgressRegistry::new();
        let fetcher = HttpFetcher::new(registry.clone()).unwrap();
        let size = fetcher.fetch(&url, "tool.tar.gz", &mut staging).await.unwrap();

        assert_eq!(size, 4096);
        assert_eq!(staging.bytes_written(), 4096);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_non_200_is_origin_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let url = format!("{}/missing", mock_server.uri());
        let mut staging = staging_for(&store, &url).await;

        let registry = ProgressRegistry::new();
        let fetcher = HttpFetcher::new(registry.clone()).unwrap();
        let err = fetcher.fetch(&url, "missing", &mut staging).await.unwrap_err();

        match err {
            CacheError::Origin { status, .. } => assert_eq!(status, 404),
            other => panic!("expected origin error, got {other:?}"),
        }
        assert_eq!(staging.bytes_written(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_follows_redirects() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/blob", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blob"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let url = format!("{}/download", mock_server.uri());
        let mut staging = staging_for(&store, &url).await;

        let fetcher = HttpFetcher::new(ProgressRegistry::new()).unwrap();
        let size = fetcher.fetch(&url, "download", &mut staging).await.unwrap();
        assert_eq!(size, 7);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_transport_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/loop", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let url = format!("{}/loop", mock_server.uri());
        let mut staging = staging_for(&store, &url).await;

        let fetcher = HttpFetcher::new(ProgressRegistry::new()).unwrap();
        let err = fetcher.fetch(&url, "loop", &mut staging).await.unwrap_err();
        assert!(matches!(err, CacheError::Transport(_)));
    }

    #[tokio::test]
    async fn test_invalid_proxy_is_ignored() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_string("zip"))
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let url = format!("{}/file.zip", mock_server.uri());
        let mut staging = staging_for(&store, &url).await;

        let resolver = Arc::new(CountingProxy {
            endpoint: "socks5://127.0.0.1:1".to_string(),
            calls: AtomicUsize::new(0),
        });
        let fetcher = HttpFetcher::new(ProgressRegistry::new())
            .unwrap()
            .with_proxy(resolver.clone());

        let size = fetcher.fetch(&url, "file.zip", &mut staging).await.unwrap();
        assert_eq!(size, 3);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_valid_proxy_carries_request() {
        let proxy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("via proxy"))
            .expect(1)
            .mount(&proxy_server)
            .await;

        // Only reachable through the proxy
        let url = "http://artifacts.invalid/releases/tool.tar.gz";
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let mut staging = staging_for(&store, url).await;

        let resolver = Arc::new(CountingProxy {
            endpoint: proxy_server.uri(),
            calls: AtomicUsize::new(0),
        });
        let fetcher = HttpFetcher::new(ProgressRegistry::new())
            .unwrap()
            .with_proxy(resolver.clone());

        let size = fetcher.fetch(url, "tool.tar.gz", &mut staging).await.unwrap();
        assert_eq!(size, "via proxy".len() as u64);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        let received = proxy_server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].url.host_str(), Some("artifacts.invalid"));
        assert_eq!(received[0].url.path(), "/releases/tool.tar.gz");
    }

    #[tokio::test]
    async fn test_progress_visible_during_transfer() {
        let url = paced_origin(
            "HTTP/1.1 200 OK\r\nContent-Length: 8\r\nConnection: close\r\n\r\n",
            b"abcd",
            b"efgh",
            Duration::from_millis(300),
        )
        .await;

        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let mut staging = staging_for(&store, &url).await;

        let registry = ProgressRegistry::new();
        let fetcher = Arc::new(HttpFetcher::new(registry.clone()).unwrap());
        let transfer = {
            let fetcher = fetcher.clone();
            let url = url.clone();
            tokio::spawn(async move {
                let result = fetcher.fetch(&url, "artifact.bin", &mut staging).await;
                (result, staging)
            })
        };

        let snapshot = wait_for_progress(&registry).await;
        assert_eq!(snapshot.url, url);
        assert_eq!(snapshot.filename, "artifact.bin");
        assert_eq!(snapshot.bytes_copied, 4);
        assert_eq!(snapshot.total_bytes, 8);
        assert_eq!(snapshot.percent(), 50.0);

        let (result, staging) = transfer.await.unwrap();
        assert_eq!(result.unwrap(), 8);
        assert_eq!(staging.bytes_written(), 8);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_length_is_tolerated() {
        let url = paced_origin(
            "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n",
            b"abcd",
            b"efgh",
            Duration::from_millis(300),
        )
        .await;

        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let mut staging = staging_for(&store, &url).await;

        let registry = ProgressRegistry::new();
        let fetcher = Arc::new(HttpFetcher::new(registry.clone()).unwrap());
        let transfer = {
            let fetcher = fetcher.clone();
            let url = url.clone();
            tokio::spawn(async move { fetcher.fetch(&url, "artifact.bin", &mut staging).await })
        };

        let snapshot = wait_for_progress(&registry).await;
        assert_eq!(snapshot.total_bytes, 0);
        assert_eq!(snapshot.percent(), 0.0);

        assert_eq!(transfer.await.unwrap().unwrap(), 8);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_body_is_transport_error() {
        let url = paced_origin(
            "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n",
            b"0123456789",
            b"",
            Duration::from_millis(300),
        )
        .await;

        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let mut staging = staging_for(&store, &url).await;

        let registry = ProgressRegistry::new();
        let fetcher = Arc::new(HttpFetcher::new(registry.clone()).unwrap());
        let transfer = {
            let fetcher = fetcher.clone();
            let url = url.clone();
            tokio::spawn(async move { fetcher.fetch(&url, "artifact.bin", &mut staging).await })
        };

        let snapshot = wait_for_progress(&registry).await;
        assert_eq!(snapshot.total_bytes, 100);

        let err = transfer.await.unwrap().unwrap_err();
        assert!(matches!(err, CacheError::Transport(_)), "got {err:?}");
        assert!(registry.is_empty());
    }
}
