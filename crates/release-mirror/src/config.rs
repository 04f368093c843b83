use crate::routing::{default_rules, MirrorRule};
use artifact_cache::FetcherConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration from command-line flags, each backed by an environment variable
#[derive(Debug, Clone, Parser)]
#[command(name = "release-mirror", version, about = "Caching mirror for release artifacts")]
pub struct Config {
    /// Listen port
    #[arg(short = 'p', long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Cached data store path
    #[arg(short = 'd', long = "data-dir", env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Proxy address (http://...) or a shell command printing one
    #[arg(long, env = "PROXY", default_value = "")]
    pub proxy: String,

    /// Remove entries not read for this many seconds
    #[arg(long, env = "RETENTION_SECS", default_value_t = 7 * 24 * 60 * 60)]
    pub retention_secs: u64,

    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60 * 60)]
    pub sweep_interval_secs: u64,

    /// Upper bound on a whole download
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 60 * 60)]
    pub fetch_timeout_secs: u64,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    pub connect_timeout_secs: u64,

    /// Comma separated prefix=upstream pairs, first match wins
    #[arg(long = "mirror", env = "MIRROR_RULES", value_delimiter = ',')]
    pub mirrors: Vec<MirrorRule>,
}

impl Config {
    /// Configured mirror rules, or the GitHub rule when none are given
    pub fn rules(&self) -> Vec<MirrorRule> {
        if self.mirrors.is_empty() {
            default_rules()
        } else {
            self.mirrors.clone()
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // A zero period would make the interval timer panic
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..FetcherConfig::default()
        }
    }
}
