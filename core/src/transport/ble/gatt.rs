/// GATT notify service definition and connection state tracking
///
/// This module holds the link context of the BLE path: link state, the
/// notify channel (enable flag + negotiated payload size), the shared chunk
/// sequence counter and the attribute handle table. Stack callbacks mutate it
/// through the `on_*` methods; bridges only read it.

use crate::transport::abstraction::{LinkState, NotifyTarget, PeerAddress};
use crate::transport::ble::framing::{SequenceCounter, MIN_MAX_PAYLOAD};
use parking_lot::RwLock;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Serial data service UUID (0xFFE0)
pub const SPP_SERVICE_UUID: u16 = 0xFFE0;

/// Data notify characteristic UUID (0xFFE1)
pub const SPP_DATA_NOTIFY_UUID: u16 = 0xFFE1;

/// ATT notification header: opcode (1) + handle (2)
pub const ATT_HEADER_OVERHEAD: u16 = 3;

/// ATT MTU before any exchange
pub const DEFAULT_MTU: u16 = 23;

/// Attributes of the serial data service, in table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeIndex {
    /// Primary service declaration
    Service,
    /// Data characteristic declaration
    DataNotifyChar,
    /// Data characteristic value
    DataNotifyValue,
    /// Client characteristic configuration descriptor
    DataNotifyConfig,
}

impl AttributeIndex {
    /// Number of attributes in the table
    pub const COUNT: usize = 4;

    /// All attributes in table order
    pub const ALL: [AttributeIndex; Self::COUNT] = [
        AttributeIndex::Service,
        AttributeIndex::DataNotifyChar,
        AttributeIndex::DataNotifyValue,
        AttributeIndex::DataNotifyConfig,
    ];

    /// Position in the table
    pub fn position(self) -> usize {
        self as usize
    }
}

/// Attribute handles assigned by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleTable {
    handles: [u16; AttributeIndex::COUNT],
}

impl HandleTable {
    /// Build from the stack's handle list; it must contain exactly one handle
    /// per attribute
    pub fn from_handles(handles: &[u16]) -> Option<Self> {
        let handles: [u16; AttributeIndex::COUNT] = handles.try_into().ok()?;
        Some(Self { handles })
    }

    /// Handle of an attribute
    pub fn handle(&self, index: AttributeIndex) -> u16 {
        self.handles[index.position()]
    }

    /// Which attribute a handle belongs to. A linear scan over four entries.
    pub fn find(&self, handle: u16) -> Option<AttributeIndex> {
        AttributeIndex::ALL
            .iter()
            .zip(self.handles.iter())
            .find(|(_, h)| **h == handle)
            .map(|(&index, _)| index)
    }
}

/// Decoded client configuration write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyConfig {
    Enable,
    Disable,
}

impl NotifyConfig {
    /// `{0x01, 0x00}` enables, `{0x00, 0x00}` disables, anything else is
    /// not a notify configuration
    pub fn parse(value: &[u8]) -> Option<Self> {
        match value {
            [0x01, 0x00] => Some(NotifyConfig::Enable),
            [0x00, 0x00] => Some(NotifyConfig::Disable),
            _ => None,
        }
    }
}

/// Notify channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyChannel {
    /// Peer subscribed to notifications
    pub enabled: bool,
    /// Negotiated MTU minus the ATT header
    pub max_payload: u16,
}

/// Read-only view of the link taken by the notify bridge per receive cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub notify: NotifyChannel,
    pub target: Option<NotifyTarget>,
}

impl LinkSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }
}

#[derive(Debug)]
struct LinkRecord {
    state: LinkState,
    remote: Option<PeerAddress>,
    conn_id: Option<u16>,
    established_at: Option<Instant>,
    notify: NotifyChannel,
    handles: Option<HandleTable>,
}

/// Link context of the GATT path
#[derive(Debug)]
pub struct GattLink {
    record: RwLock<LinkRecord>,
    sequence: SequenceCounter,
}

impl GattLink {
    /// Create an idle link assuming `initial_mtu` until negotiation
    pub fn new(initial_mtu: u16) -> Self {
        let max_payload = initial_mtu
            .checked_sub(ATT_HEADER_OVERHEAD)
            .filter(|p| *p >= MIN_MAX_PAYLOAD)
            .unwrap_or(DEFAULT_MTU - ATT_HEADER_OVERHEAD);
        Self {
            record: RwLock::new(LinkRecord {
                state: LinkState::Idle,
                remote: None,
                conn_id: None,
                established_at: None,
                notify: NotifyChannel {
                    enabled: false,
                    max_payload,
                },
                handles: None,
            }),
            sequence: SequenceCounter::new(),
        }
    }

    /// Radio stack started advertising
    pub fn on_advertising_started(&self) {
        let mut record = self.record.write();
        if record.state == LinkState::Idle {
            record.state = LinkState::Advertising;
        }
        debug!("GATT link advertising (state {})", record.state);
    }

    /// Peer connected
    pub fn on_connect(&self, conn_id: u16, remote: PeerAddress) {
        let mut record = self.record.write();
        if record.state == LinkState::Connected {
            warn!(
                "GATT connect from {} while already connected to {:?}",
                remote, record.remote
            );
        }
        record.state = LinkState::Connected;
        record.remote = Some(remote);
        record.conn_id = Some(conn_id);
        record.established_at = Some(Instant::now());
        info!("GATT connected: {} (conn_id {})", remote, conn_id);
    }

    /// Peer disconnected; the link goes back to advertising and
    /// notifications are switched off
    pub fn on_disconnect(&self) {
        let mut record = self.record.write();
        record.state = LinkState::Advertising;
        record.notify.enabled = false;
        record.conn_id = None;
        record.established_at = None;
        info!("GATT disconnected: {:?}", record.remote.take());
    }

    /// Apply a write to the client configuration descriptor.
    /// Malformed values are ignored. Returns the new enable state when it
    /// was recognised.
    pub fn on_notify_config_write(&self, value: &[u8]) -> Option<bool> {
        let Some(config) = NotifyConfig::parse(value) else {
            debug!("Ignoring notify config write {:02x?}", value);
            return None;
        };
        let enabled = config == NotifyConfig::Enable;
        self.record.write().notify.enabled = enabled;
        info!(
            "Notifications {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Some(enabled)
    }

    /// Route a peer attribute write by handle. Prepared writes and writes to
    /// anything other than the configuration descriptor are ignored.
    pub fn on_attribute_write(&self, handle: u16, value: &[u8], is_prep: bool) -> Option<bool> {
        if is_prep {
            debug!("Ignoring prepared write to handle {}", handle);
            return None;
        }
        let index = self.record.read().handles.and_then(|t| t.find(handle));
        debug!("Write to handle {} ({:?})", handle, index);
        match index {
            Some(AttributeIndex::DataNotifyConfig) => self.on_notify_config_write(value),
            _ => None,
        }
    }

    /// ATT MTU exchange finished. A size too small to carry a tag and one
    /// data byte keeps the previous payload size.
    pub fn on_mtu_negotiated(&self, mtu: u16) {
        let mut record = self.record.write();
        match mtu
            .checked_sub(ATT_HEADER_OVERHEAD)
            .filter(|p| *p >= MIN_MAX_PAYLOAD)
        {
            Some(max_payload) => {
                record.notify.max_payload = max_payload;
                info!("MTU {} negotiated, max payload {}", mtu, max_payload);
            }
            None => warn!(
                "MTU {} too small, keeping max payload {}",
                mtu, record.notify.max_payload
            ),
        }
    }

    /// Attribute table created by the stack
    pub fn on_attribute_table(&self, table: HandleTable) {
        self.record.write().handles = Some(table);
    }

    pub fn is_connected(&self) -> bool {
        self.record.read().state == LinkState::Connected
    }

    pub fn is_notify_enabled(&self) -> bool {
        self.record.read().notify.enabled
    }

    pub fn max_payload(&self) -> u16 {
        self.record.read().notify.max_payload
    }

    pub fn state(&self) -> LinkState {
        self.record.read().state
    }

    pub fn remote(&self) -> Option<PeerAddress> {
        self.record.read().remote
    }

    pub fn established_at(&self) -> Option<Instant> {
        self.record.read().established_at
    }

    pub fn handles(&self) -> Option<HandleTable> {
        self.record.read().handles
    }

    /// Chunk sequence counter shared by all transfers on this link
    pub fn sequence(&self) -> &SequenceCounter {
        &self.sequence
    }

    /// Consistent view of everything the notify bridge needs
    pub fn snapshot(&self) -> LinkSnapshot {
        let record = self.record.read();
        let target = match (record.conn_id, record.handles) {
            (Some(conn_id), Some(table)) => Some(NotifyTarget {
                conn_id,
                handle: table.handle(AttributeIndex::DataNotifyValue),
            }),
            _ => None,
        };
        LinkSnapshot {
            state: record.state,
            notify: record.notify,
            target,
        }
    }
}

impl Default for GattLink {
    fn default() -> Self {
        Self::new(DEFAULT_MTU)
    }
}
