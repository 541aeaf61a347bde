// Transport module: collaborator abstractions and per-path link state

pub mod abstraction;
pub mod ble;
pub mod spp;
pub mod uart;

pub use abstraction::{
    ByteSocket, ConnectionIndicator, GattEvent, GattServer, LinkState, NoIndicator,
    NotifySink, NotifyTarget, PeerAddress, SppEvent, SppServer, TransportError, TransportType,
    UartEvent, UartPort,
};
pub use ble::{GattLink, SequenceCounter};
pub use spp::SppLink;
pub use uart::{DataBits, FlowControl, MemoryUart, Parity, StopBits, Ticks, UartConfig};
