// btuart core: UART to Bluetooth bridging
#![allow(clippy::empty_line_after_doc_comments)]
//
// Two independent paths share one UART:
//   GATT: UART bytes → sequence-tagged chunks → notifications
//   SPP:  UART bytes ⇄ byte-stream socket
//
// The radio stacks, the UART driver and the indicator are collaborators
// behind traits; everything here runs on tokio and is testable without
// hardware.

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod probe;
pub mod subsystem;
pub mod transport;

use thiserror::Error;

pub use bridge::{BridgeExit, BridgeOutcome, BridgeStats, NotifyBridge, SppBridge};
pub use config::{BridgeConfig, ConfigError, GattConfig, SppConfig};
pub use dispatch::{GattDispatcher, SppDispatcher};
pub use probe::{check_message, random_message, MessageSplitter, ProbeVerdict};
pub use subsystem::{start_gatt, start_spp, GattHandle, SppHandle};
pub use transport::ble::{chunk_count, ChunkReceiver, Framer, FramingError, SequenceCounter};
pub use transport::{
    ByteSocket, ConnectionIndicator, GattEvent, GattLink, GattServer, LinkState, MemoryUart,
    NoIndicator, NotifySink, NotifyTarget, PeerAddress, SppEvent, SppLink, SppServer, Ticks,
    TransportError, TransportType, UartConfig, UartEvent, UartPort,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors that stop a bridge path from starting or shutting down cleanly
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Initialization failed: {0}")]
    Init(TransportError),
    #[error("Task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: BridgeError = ConfigError::ZeroTick.into();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Tick duration must be non-zero"
        );

        let err = BridgeError::Init(TransportError::Uart("no device".to_string()));
        assert_eq!(err.to_string(), "Initialization failed: UART error: no device");
    }
}
