//! Runtime configuration
//!
//! Loaded from an optional global config file, an optional project-local
//! `mcp-runtime.toml`, and `MCP_RUNTIME_*` environment variables, later
//! sources winning.

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Default deadline for outbound requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Capacity of the per-session inbound notification queue.
    #[serde(default = "default_notification_queue_size")]
    pub notification_queue_size: usize,

    /// Run sync handlers inline instead of on the blocking pool. Only safe
    /// when the transport's reader is already decoupled from user code.
    #[serde(default)]
    pub immediate_execution: bool,
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_notification_queue_size() -> usize {
    100
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            notification_queue_size: default_notification_queue_size(),
            immediate_execution: false,
        }
    }
}

impl RuntimeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load configuration from all sources (global, project, env).
    pub async fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let content = fs::read_to_string(&global_path).await?;
                config = toml::from_str(&content)?;
            }
        }

        let project_path = PathBuf::from("mcp-runtime.toml");
        if project_path.exists() {
            let content = fs::read_to_string(&project_path).await?;
            config = toml::from_str(&content)?;
        }

        config.apply_env();
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("io", "mcp", "mcp-runtime")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("MCP_RUNTIME_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse() {
                self.request_timeout_secs = secs;
            }
        }
        if let Ok(value) = std::env::var("MCP_RUNTIME_NOTIFICATION_QUEUE_SIZE") {
            if let Ok(size) = value.parse() {
                self.notification_queue_size = size;
            }
        }
        if let Ok(value) = std::env::var("MCP_RUNTIME_IMMEDIATE_EXECUTION") {
            self.immediate_execution = matches!(value.as_str(), "1" | "true" | "yes");
        }
    }
}
