/// BLE (Bluetooth Low Energy) Transport Module
///
/// Protocol-level pieces of the GATT notify path. It includes:
///
/// - **gatt**: link context, notify channel and attribute handle table
/// - **framing**: sequence-tagged chunk framing and the peer-side receiver
/// - **advertising**: raw advertising payload layout
///
/// The radio, attribute server and pairing live in the platform stack; the
/// code here is testable without BLE hardware.

pub mod advertising;
pub mod framing;
pub mod gatt;

// Re-export commonly used types
pub use advertising::{advertising_payload, ConnIntervalRange, MAX_ADV_LEN};

pub use framing::{
    chunk_count, Chunk, ChunkReceiver, Framer, FramingError, ReceivedChunk, ReceiverStats,
    SequenceCounter, BASE_TAG, SEQ_MAX,
};

pub use gatt::{
    AttributeIndex, GattLink, HandleTable, LinkSnapshot, NotifyChannel, NotifyConfig,
    ATT_HEADER_OVERHEAD, DEFAULT_MTU, SPP_DATA_NOTIFY_UUID, SPP_SERVICE_UUID,
};
