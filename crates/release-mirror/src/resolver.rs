//! Proxy resolvers built from the `PROXY` setting

use artifact_cache::proxy::is_valid_proxy;
use artifact_cache::{ProxyResolver, StaticProxy};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tracing::warn;

/// Runs a shell command before every fetch and uses its trimmed output
#[derive(Debug, Clone)]
pub struct CommandProxy {
    command: String,
}

impl CommandProxy {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ProxyResolver for CommandProxy {
    async fn resolve(&self) -> Option<String> {
        let output = match Command::new("bash")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(command = %self.command, error = %e, "Proxy command failed to start");
                return None;
            }
        };

        if !output.status.success() {
            warn!(command = %self.command, status = %output.status, "Proxy command failed");
            return None;
        }

        let proxy = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if proxy.is_empty() {
            None
        } else {
            Some(proxy)
        }
    }
}

/// An `http://` value is used as-is, anything else non-empty is run as a command
pub fn from_setting(setting: &str) -> Option<Arc<dyn ProxyResolver>> {
    let setting = setting.trim();
    if setting.is_empty() {
        None
    } else if is_valid_proxy(setting) {
        Some(Arc::new(StaticProxy(setting.to_string())))
    } else {
        Some(Arc::new(CommandProxy::new(setting)))
    }
}
