//! Raw advertising payload for the serial data service
//!
//! Layout (AD structures, each `len type data...`):
//! flags, complete list of 16-bit service UUIDs, slave connection interval
//! range, complete local name.

use crate::transport::ble::gatt::SPP_SERVICE_UUID;

/// Legacy advertising payload limit
pub const MAX_ADV_LEN: usize = 31;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_SERVICE_UUID16_COMPLETE: u8 = 0x03;
const AD_TYPE_NAME_COMPLETE: u8 = 0x09;
const AD_TYPE_CONN_INTERVAL_RANGE: u8 = 0x12;

/// BR/EDR not supported
const FLAGS_BREDR_NOT_SUPPORTED: u8 = 0x04;

/// Connection interval range in 1.25 ms units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnIntervalRange {
    pub min: u16,
    pub max: u16,
}

impl Default for ConnIntervalRange {
    fn default() -> Self {
        Self {
            min: 0x0020,
            max: 0x0040,
        }
    }
}

/// Build the advertising payload, truncating the name to fit
pub fn advertising_payload(name: &str, interval: ConnIntervalRange) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_ADV_LEN);
    out.extend_from_slice(&[2, AD_TYPE_FLAGS, FLAGS_BREDR_NOT_SUPPORTED]);
    out.extend_from_slice(&[3, AD_TYPE_SERVICE_UUID16_COMPLETE]);
    out.extend_from_slice(&SPP_SERVICE_UUID.to_le_bytes());
    out.extend_from_slice(&[5, AD_TYPE_CONN_INTERVAL_RANGE]);
    out.extend_from_slice(&interval.min.to_le_bytes());
    out.extend_from_slice(&interval.max.to_le_bytes());

    let room = MAX_ADV_LEN - out.len() - 2;
    let mut end = name.len().min(room);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let name = &name.as_bytes()[..end];
    out.push(1 + name.len() as u8);
    out.push(AD_TYPE_NAME_COMPLETE);
    out.extend_from_slice(name);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_layout() {
        let payload = advertising_payload("UART-1", ConnIntervalRange::default());
        assert_eq!(
            &payload[..15],
            &[0x02, 0x01, 0x04, 0x03, 0x03, 0xe0, 0xff, 0x05, 0x12, 0x20, 0x00, 0x40, 0x00, 7, 0x09]
        );
        assert_eq!(&payload[15..], b"UART-1");
    }

    #[test]
    fn test_long_name_truncated() {
        let payload = advertising_payload(&"N".repeat(40), ConnIntervalRange::default());
        assert_eq!(payload.len(), MAX_ADV_LEN);
        assert_eq!(payload[13] as usize, 1 + MAX_ADV_LEN - 15);
    }

    #[test]
    fn test_truncation_keeps_whole_characters() {
        // 15 bytes of prefix leave 16 for the name; the 6th 'é' would straddle it
        let name = format!("{}{}", "AAAAA", "é".repeat(6));
        let payload = advertising_payload(&name, ConnIntervalRange::default());
        let advertised = std::str::from_utf8(&payload[15..]).unwrap();
        assert_eq!(advertised, format!("{}{}", "AAAAA", "é".repeat(5)));
        assert_eq!(payload[13] as usize, 1 + advertised.len());
    }
}
