//! Runtime configuration: JSON file plus environment overrides.

use anyhow::{Context, Result};
use gateway_bridge::{BridgeConfig, DuplicatePolicy};
use serde::Deserialize;
use shared_types::{GatewayIdentity, Secret};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Path of the optional JSON config file.
pub const CONFIG_PATH_VAR: &str = "GS_CONFIG";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:1883";

/// Everything the runtime needs to start.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub listen_addr: String,
    pub bridge: BridgeConfig,
    /// Gateway identity to shared key.
    pub gateways: BTreeMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            bridge: BridgeConfig::default(),
            gateways: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load from `GS_CONFIG` if set, then apply `GS_*` overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(addr) = lookup("GS_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(prefix) = lookup("GS_TOPIC_PREFIX") {
            self.bridge.topic_prefix = prefix;
        }
        if let Some(policy) = lookup("GS_DUPLICATE_POLICY") {
            self.bridge.duplicate_policy = policy
                .parse::<DuplicatePolicy>()
                .context("Invalid GS_DUPLICATE_POLICY")?;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address {:?}", self.listen_addr))
    }

    /// Validated gateway key table.
    pub fn gateway_keys(&self) -> Result<Vec<(GatewayIdentity, Secret)>> {
        self.gateways
            .iter()
            .map(|(id, key)| {
                let gateway = GatewayIdentity::new(id.as_str())
                    .with_context(|| format!("Invalid gateway identity {id:?}"))?;
                Ok((gateway, Secret::new(key.as_str())))
            })
            .collect()
    }
}
