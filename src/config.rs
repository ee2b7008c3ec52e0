// src/config.rs

//! Configuration loading and runtime settings.
//!
//! Configuration comes from a TOML file with default fallback, overlaid
//! by environment variables. Runtime-dynamic settings (the loop count)
//! travel over a watch channel fed by JSON-Patch style batches; the
//! engine reacts only to the `/count` path.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use crate::error::Result;
use crate::models::Config;

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file is missing or unreadable.
pub fn load_config(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(toml::from_str(&raw)?),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config not loaded; using defaults");
            Ok(Config::default())
        }
    }
}

/// Overlay recognized environment variables onto the configuration.
pub fn apply_env(config: &mut Config) {
    if let Ok(name) = env::var("FORGECRAWL_NAME") {
        config.crawler.name = name;
    }
    if let Ok(count) = env::var("FORGECRAWL_COUNT") {
        if let Ok(count) = count.parse() {
            config.crawler.count = count;
        }
    }
    if let Ok(orgs) = env::var("FORGECRAWL_ORGS") {
        config.crawler.org_allowlist = orgs
            .split(',')
            .map(str::trim)
            .filter(|org| !org.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Ok(token) = env::var("FORGECRAWL_TOKEN") {
        config.fetch.token = Some(token);
    }
    if let Ok(api_base) = env::var("FORGECRAWL_API_BASE") {
        config.fetch.api_base = api_base;
    }
    if let Ok(provider) = env::var("FORGECRAWL_QUEUE_PROVIDER") {
        config.queue.provider = provider;
    }
    if let Ok(prefix) = env::var("FORGECRAWL_QUEUE_PREFIX") {
        config.queue.prefix = prefix;
    }
    if let Ok(provider) = env::var("FORGECRAWL_STORE_PROVIDER") {
        config.storage.provider = provider;
    }
    if let Ok(path) = env::var("FORGECRAWL_STORE_PATH") {
        config.storage.path = path;
    }
}

/// One JSON-Patch style operation from the configuration service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub op: String,
    pub path: String,
    pub value: serde_json::Value,
}

/// Settings that may change while the engine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicSettings {
    /// Target worker loop count.
    pub count: usize,
}

/// Change-notification channel for dynamic settings.
pub struct SettingsChannel {
    tx: watch::Sender<DynamicSettings>,
}

impl SettingsChannel {
    pub fn new(initial: DynamicSettings) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<DynamicSettings> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> DynamicSettings {
        self.tx.borrow().clone()
    }

    /// Apply a patch batch. Only `add`/`replace` on `/count` is observed;
    /// everything else is ignored.
    pub fn apply(&self, patches: &[SettingsPatch]) {
        let mut settings = self.tx.borrow().clone();
        let mut changed = false;
        for patch in patches {
            if patch.path == "/count" && matches!(patch.op.as_str(), "add" | "replace") {
                if let Some(count) = patch.value.as_u64() {
                    settings.count = count as usize;
                    changed = true;
                }
            }
        }
        if changed {
            let _ = self.tx.send(settings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_missing_config_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.crawler.count, 1);
    }

    #[test]
    fn test_apply_count_patch() {
        let channel = SettingsChannel::new(DynamicSettings { count: 1 });
        channel.apply(&[SettingsPatch {
            op: "replace".to_string(),
            path: "/count".to_string(),
            value: json!(4),
        }]);
        assert_eq!(channel.current().count, 4);
    }

    #[test]
    fn test_ignore_unrelated_patches() {
        let channel = SettingsChannel::new(DynamicSettings { count: 1 });
        channel.apply(&[
            SettingsPatch {
                op: "replace".to_string(),
                path: "/other".to_string(),
                value: json!(9),
            },
            SettingsPatch {
                op: "remove".to_string(),
                path: "/count".to_string(),
                value: json!(null),
            },
        ]);
        assert_eq!(channel.current().count, 1);
    }

    #[test]
    fn test_patch_batch_parses_from_json() {
        let patches: Vec<SettingsPatch> =
            serde_json::from_str(r#"[{"op": "replace", "path": "/count", "value": 3}]"#).unwrap();
        let channel = SettingsChannel::new(DynamicSettings { count: 1 });
        channel.apply(&patches);
        assert_eq!(channel.current().count, 3);
    }
}
