// Bridge module: the two data paths between the UART and the radio
//
// notify: UART receive events → sequence-tagged GATT notifications
// spp:    bidirectional byte pump between the UART and an SPP socket

pub mod notify;
pub mod spp;

pub use notify::NotifyBridge;
pub use spp::SppBridge;

use crate::transport::TransportError;
use std::fmt;

/// Counters kept by a bridge task over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Bytes read from the UART
    pub uart_bytes_in: u64,
    /// Bytes written to the UART
    pub uart_bytes_out: u64,
    /// Payload bytes handed to the radio
    pub radio_bytes_out: u64,
    /// Bytes received from the radio
    pub radio_bytes_in: u64,
    /// Notifications accepted by the stack
    pub chunks_sent: u64,
    /// Notifications the stack refused
    pub chunks_failed: u64,
    /// UART bytes dropped because the link could not take them
    pub bytes_discarded: u64,
    pub allocation_failures: u64,
}

impl BridgeStats {
    /// Add another run's counters to these
    pub fn merge(&mut self, other: &BridgeStats) {
        self.uart_bytes_in += other.uart_bytes_in;
        self.uart_bytes_out += other.uart_bytes_out;
        self.radio_bytes_out += other.radio_bytes_out;
        self.radio_bytes_in += other.radio_bytes_in;
        self.chunks_sent += other.chunks_sent;
        self.chunks_failed += other.chunks_failed;
        self.bytes_discarded += other.bytes_discarded;
        self.allocation_failures += other.allocation_failures;
    }
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uart in {} / out {}, radio in {} / out {}, chunks {} sent {} failed, {} discarded, {} allocation failures",
            self.uart_bytes_in,
            self.uart_bytes_out,
            self.radio_bytes_in,
            self.radio_bytes_out,
            self.chunks_sent,
            self.chunks_failed,
            self.bytes_discarded,
            self.allocation_failures
        )
    }
}

/// Why a byte bridge stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeExit {
    /// The socket failed; the link is gone
    Disconnected(TransportError),
    /// Asked to stop by the owner
    Shutdown,
}

/// Result of one byte bridge run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOutcome {
    pub exit: BridgeExit,
    pub stats: BridgeStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_display() {
        let mut total = BridgeStats {
            chunks_sent: 3,
            bytes_discarded: 4,
            ..BridgeStats::default()
        };
        total.merge(&BridgeStats {
            chunks_sent: 2,
            allocation_failures: 1,
            ..BridgeStats::default()
        });

        assert_eq!(total.chunks_sent, 5);
        let line = total.to_string();
        assert!(line.contains("chunks 5 sent 0 failed"));
        assert!(line.contains("4 discarded"));
        assert!(line.contains("1 allocation failures"));
    }
}
