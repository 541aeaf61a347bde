//! Bridge configuration
//!
//! One serde-friendly struct per path plus the UART line settings. Loading
//! and persisting the file is left to the binary.

use crate::transport::ble::advertising::ConnIntervalRange;
use crate::transport::ble::gatt::DEFAULT_MTU;
use crate::transport::uart::UartConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Smallest MTU that can carry a tag and one data byte
pub const MIN_INITIAL_MTU: u16 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Baud rate must be non-zero")]
    ZeroBaudRate,
    #[error("Initial MTU {0} is below the minimum of {MIN_INITIAL_MTU}")]
    MtuTooSmall(u16),
    #[error("Device name must not be empty")]
    EmptyDeviceName,
    #[error("Advertising interval min 0x{0:04x} exceeds max 0x{1:04x}")]
    AdvertisingInterval(u16, u16),
    #[error("Transfer unit must be non-zero")]
    ZeroTransferUnit,
    #[error("Bulk threshold {threshold} is below one transfer unit ({unit})")]
    BulkThreshold { threshold: usize, unit: usize },
    #[error("Tick duration must be non-zero")]
    ZeroTick,
}

/// GATT notify path settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattConfig {
    /// ATT MTU assumed until the peer negotiates one
    pub initial_mtu: u16,
    /// Advertised local name
    pub device_name: String,
    /// Advertised connection interval range, 1.25 ms units
    pub adv_interval_min: u16,
    pub adv_interval_max: u16,
    /// Request acknowledged indications instead of notifications
    pub ack_required: bool,
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            initial_mtu: DEFAULT_MTU,
            device_name: "BT-UART".to_string(),
            adv_interval_min: 0x20,
            adv_interval_max: 0x40,
            ack_required: false,
        }
    }
}

impl GattConfig {
    pub fn conn_interval(&self) -> ConnIntervalRange {
        ConnIntervalRange {
            min: self.adv_interval_min,
            max: self.adv_interval_max,
        }
    }
}

/// SPP byte bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SppConfig {
    /// Bytes moved per UART read / socket read
    pub transfer_unit: usize,
    /// Buffered UART bytes that switch the bridge to bulk draining
    pub bulk_threshold: usize,
    /// Length of one scheduler tick in milliseconds
    pub tick_ms: u64,
    /// Service name registered with the SPP server
    pub server_name: String,
}

impl Default for SppConfig {
    fn default() -> Self {
        Self {
            transfer_unit: 128,
            bulk_threshold: 512,
            tick_ms: 10,
            server_name: "SPP_SERVER".to_string(),
        }
    }
}

impl SppConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub uart: UartConfig,
    pub gatt: GattConfig,
    pub spp: SppConfig,
}

impl BridgeConfig {
    /// Check the settings the bridges rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uart.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        if self.gatt.initial_mtu < MIN_INITIAL_MTU {
            return Err(ConfigError::MtuTooSmall(self.gatt.initial_mtu));
        }
        if self.gatt.device_name.is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }
        if self.gatt.adv_interval_min > self.gatt.adv_interval_max {
            return Err(ConfigError::AdvertisingInterval(
                self.gatt.adv_interval_min,
                self.gatt.adv_interval_max,
            ));
        }
        if self.spp.transfer_unit == 0 {
            return Err(ConfigError::ZeroTransferUnit);
        }
        if self.spp.bulk_threshold < self.spp.transfer_unit {
            return Err(ConfigError::BulkThreshold {
                threshold: self.spp.bulk_threshold,
                unit: self.spp.transfer_unit,
            });
        }
        if self.spp.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }
}
