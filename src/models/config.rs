// src/models/config.rs

//! Engine configuration structures.

use std::time::Duration;

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerSettings,
    pub fetch: FetchSettings,
    pub queue: QueueSettings,
    pub storage: StorageSettings,
}

/// Worker-loop and pipeline behavior.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlerSettings {
    /// Crawler name, used in diagnostics.
    pub name: String,
    /// Target number of concurrent worker loops.
    pub count: usize,
    /// Base delay between cycles, in milliseconds.
    pub loop_delay_ms: u64,
    /// Delay before re-polling an exhausted queue, in milliseconds.
    pub polling_delay_ms: u64,
    /// Lease TTL covering one request's processing, in milliseconds.
    pub processing_ttl_ms: u64,
    /// Delivery attempts before a request is dead-lettered.
    pub max_attempts: u32,
    /// When non-empty, only these organizations are crawled.
    pub org_allowlist: Vec<String>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            name: "forgecrawl".to_string(),
            count: 1,
            loop_delay_ms: 0,
            polling_delay_ms: 2_000,
            processing_ttl_ms: 60_000,
            max_attempts: 5,
            org_allowlist: Vec::new(),
        }
    }
}

impl CrawlerSettings {
    pub fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    pub fn processing_ttl(&self) -> Duration {
        Duration::from_millis(self.processing_ttl_ms)
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }
}

/// Remote API access settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchSettings {
    pub api_base: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Credential token for the remote API.
    pub token: Option<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            user_agent: "forgecrawl/0.1".to_string(),
            timeout_secs: 30,
            token: None,
        }
    }
}

/// Queue broker selection.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueSettings {
    /// Broker binding; `memory` is the in-process reference binding.
    pub provider: String,
    /// Queue name prefix: `{prefix}-priority`, `{prefix}-normal`, ...
    pub prefix: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            prefix: "crawler".to_string(),
        }
    }
}

/// Document store selection.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    /// Store binding; `memory` or `local`.
    pub provider: String,
    /// Root directory for the `local` binding.
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            path: "./data/store".to_string(),
        }
    }
}
