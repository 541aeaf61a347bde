// Configuration management for the btuart CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/btuart/config.json
// - Linux: ~/.config/btuart/config.json
// - Windows: %APPDATA%\btuart\config.json

use anyhow::{Context, Result};
use btuart_core::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub bridge: BridgeConfig,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("btuart");
        Ok(config_dir)
    }

    /// Config file location, `explicit` taking precedence over the default
    pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
        match explicit {
            Some(path) => Ok(path.to_path_buf()),
            None => Ok(Self::config_dir()?.join("config.json")),
        }
    }

    /// Load config from file, or create default if not exists
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .bridge
                .validate()
                .context("Invalid configuration")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value by dotted key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.bridge.clone();
        let bridge = &mut updated;
        match key {
            "uart.baud_rate" => {
                bridge.uart.baud_rate = value.parse().context("Invalid baud rate")?;
            }
            "gatt.initial_mtu" => {
                bridge.gatt.initial_mtu = value.parse().context("Invalid MTU")?;
            }
            "gatt.device_name" => bridge.gatt.device_name = value.to_string(),
            "gatt.ack_required" => {
                bridge.gatt.ack_required = value.parse().context("Invalid boolean value")?;
            }
            "spp.transfer_unit" => {
                bridge.spp.transfer_unit = value.parse().context("Invalid number")?;
            }
            "spp.bulk_threshold" => {
                bridge.spp.bulk_threshold = value.parse().context("Invalid number")?;
            }
            "spp.tick_ms" => {
                bridge.spp.tick_ms = value.parse().context("Invalid number")?;
            }
            "spp.server_name" => bridge.spp.server_name = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated.validate().context("Invalid configuration")?;
        self.bridge = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let b = &self.bridge;
        vec![
            ("uart.baud_rate".to_string(), b.uart.baud_rate.to_string()),
            ("gatt.initial_mtu".to_string(), b.gatt.initial_mtu.to_string()),
            ("gatt.device_name".to_string(), b.gatt.device_name.clone()),
            ("gatt.ack_required".to_string(), b.gatt.ack_required.to_string()),
            ("spp.transfer_unit".to_string(), b.spp.transfer_unit.to_string()),
            ("spp.bulk_threshold".to_string(), b.spp.bulk_threshold.to_string()),
            ("spp.tick_ms".to_string(), b.spp.tick_ms.to_string()),
            ("spp.server_name".to_string(), b.spp.server_name.clone()),
        ]
    }
}
