//! Process-level settings (`[gateway]`, `[storage]` and `[logging]` sections)

use crate::config::issue::ConfigIssue;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// # Example
///
/// ```toml
/// [gateway]
/// bind = "0.0.0.0:8787"              # used by `serve`
/// url = "http://gateway.internal:8787"  # clients talk to a remote gateway
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileGatewayConfig {
    pub bind: String,
    pub url: Option<String>,
}

impl Default for FileGatewayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            url: None,
        }
    }
}

impl FileGatewayConfig {
    pub fn bind_addr(&self) -> (SocketAddr, Vec<ConfigIssue>) {
        match self.bind.parse() {
            Ok(addr) => (addr, vec![]),
            Err(_) => (
                default_bind(),
                vec![ConfigIssue::constraint(
                    "gateway.bind",
                    format!(
                        "gateway.bind: '{}' is not a socket address, using {}",
                        self.bind, DEFAULT_BIND
                    ),
                )],
            ),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8787))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStorageConfig {
    /// Conversation file; defaults under the user data directory.
    pub path: Option<PathBuf>,
}

impl FileStorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .map(|d| d.join("roundtable"))
                .unwrap_or_else(|| PathBuf::from(".roundtable"))
                .join("conversations.json"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// Directory for daily-rolled server logs.
    pub dir: Option<PathBuf>,
    /// JSONL file receiving every turn event.
    pub turn_events: Option<PathBuf>,
}
