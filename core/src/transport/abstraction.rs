//! Transport abstraction layer for the UART bridge
//!
//! Defines the collaborator traits the bridges talk to (UART driver, GATT
//! notify sink, byte-stream socket, connection indicator, stack control) and
//! the events those collaborators emit.

use crate::transport::uart::{Ticks, UartConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which wireless path a component belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    /// Bluetooth Low Energy GATT notify channel (packetized)
    Gatt,
    /// Bluetooth Classic serial port profile (byte stream)
    Spp,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Gatt => write!(f, "GATT"),
            TransportType::Spp => write!(f, "SPP"),
        }
    }
}

/// Wireless link state, one per transport instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    /// Created, radio stack not ready yet
    Idle,
    /// Stack ready and waiting for a peer
    Advertising,
    /// A peer is connected
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "idle"),
            LinkState::Advertising => write!(f, "advertising"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Opaque Bluetooth device address of the remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PeerAddress(pub [u8; 6]);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Errors reported by transport collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("UART error: {0}")]
    Uart(String),
    #[error("Socket closed by peer")]
    SocketClosed,
    #[error("Socket error: {0}")]
    Socket(String),
    #[error("Notification rejected: {0}")]
    NotifyRejected(String),
    #[error("Buffer allocation failed ({0} bytes)")]
    Allocation(usize),
    #[error("Stack request failed: {0}")]
    Stack(String),
}

/// Events produced by the UART driver's event queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartEvent {
    /// `size` bytes arrived and are waiting in the receive buffer
    DataReceived { size: usize },
    /// Hardware FIFO overflowed, bytes were lost
    FifoOverflow,
    /// Driver ring buffer is full, bytes were lost
    BufferFull,
    /// Break condition on the line
    Break,
    /// Parity check failed
    ParityError,
    /// Framing (stop bit) error
    FrameError,
}

/// Address of the notify value attribute on a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyTarget {
    /// Connection id assigned by the stack at connect time
    pub conn_id: u16,
    /// Attribute handle of the data value characteristic
    pub handle: u16,
}

/// Events emitted by the GATT server stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// Application registration with the GATT server finished
    Registered { ok: bool },
    /// The attribute table was created; `handles` follows the table order
    AttrTableCreated { ok: bool, handles: Vec<u16> },
    /// Raw advertising data was accepted by the stack
    AdvertisingDataSet,
    /// Advertising start completed
    AdvertisingStarted { ok: bool },
    /// A central connected
    Connect { conn_id: u16, remote: PeerAddress },
    /// The central disconnected
    Disconnect,
    /// The peer wrote an attribute
    ConfigWrite {
        handle: u16,
        value: Vec<u8>,
        is_prep: bool,
    },
    /// ATT MTU exchange completed
    MtuNegotiated { mtu: u16 },
    /// Link congestion state changed
    Congested { congested: bool },
}

/// Events emitted by the serial port profile stack
pub enum SppEvent<S> {
    /// Profile initialised; the server can be started
    Init { ok: bool },
    /// Server is listening and discoverable
    Started,
    /// A client opened the service; the socket is handed to the bridge
    ServiceOpen(S),
    /// The connection was closed by the stack
    Close,
}

impl<S> fmt::Debug for SppEvent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SppEvent::Init { ok } => write!(f, "Init {{ ok: {} }}", ok),
            SppEvent::Started => write!(f, "Started"),
            SppEvent::ServiceOpen(_) => write!(f, "ServiceOpen"),
            SppEvent::Close => write!(f, "Close"),
        }
    }
}

/// UART driver collaborator
#[async_trait]
pub trait UartPort: Send + Sync {
    /// Apply line settings
    fn configure(&self, config: &UartConfig) -> Result<(), TransportError>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout` for the buffer
    /// to fill. Returns 0 on timeout.
    async fn read(&self, buf: &mut [u8], timeout: Ticks) -> Result<usize, TransportError>;

    /// Queue bytes for transmission, returning how many were accepted
    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Number of received bytes currently buffered by the driver
    fn buffered_len(&self) -> usize;

    /// Discard everything in the receive buffer
    fn flush_input(&self);
}

/// Packetized transport: sends one GATT notification per call
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn send_notification(
        &self,
        target: NotifyTarget,
        payload: &[u8],
        ack_required: bool,
    ) -> Result<(), TransportError>;
}

/// Byte-stream transport socket.
///
/// Both calls are non-blocking: `Ok(0)` means nothing could be transferred
/// right now, `Err` means the link is gone.
pub trait ByteSocket: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;
}

/// Connection indicator (an LED on real hardware)
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionIndicator: Send + Sync {
    fn set_connected(&self, connected: bool);
}

/// Control requests the GATT dispatcher issues to the stack
#[cfg_attr(test, mockall::automock)]
pub trait GattServer: Send + Sync {
    fn set_advertising_data(&self, payload: &[u8]) -> Result<(), TransportError>;
    fn start_advertising(&self) -> Result<(), TransportError>;
    fn create_attribute_table(&self) -> Result<(), TransportError>;
    fn start_service(&self, service_handle: u16) -> Result<(), TransportError>;
}

/// Control requests the SPP dispatcher issues to the stack
#[cfg_attr(test, mockall::automock)]
pub trait SppServer: Send + Sync {
    fn start_server(&self, name: &str) -> Result<(), TransportError>;
}

/// Indicator that does nothing, for setups without one
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndicator;

impl ConnectionIndicator for NoIndicator {
    fn set_connected(&self, _connected: bool) {}
}
