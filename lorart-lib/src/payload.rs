//! Binary payload codec: the 3-byte uplink request and the 1–2 byte downlink answer.

use crate::constants::{CMD_SEND_BINARY, UPLINK_FRAME_SIZE, UPLINK_TAG, URC_RECEIVE_BINARY};
use modular_bitfield::prelude::*;
use serde::Serialize;

/// Uplink request `{tag, code, etag}`; a missing etag is sent as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkFrame {
    pub code: u8,
    pub etag: Option<u8>,
}

impl UplinkFrame {
    pub fn new(code: u8, etag: Option<u8>) -> Self {
        Self { code, etag }
    }

    pub fn to_bytes(&self) -> [u8; UPLINK_FRAME_SIZE] {
        [UPLINK_TAG, self.code, self.etag.unwrap_or(0)]
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.to_bytes())
    }

    /// The `AT+SENDB=<hex>` command carrying this frame.
    pub fn command(&self) -> String {
        format!("{CMD_SEND_BINARY}{}", self.to_hex())
    }
}

/// First downlink byte, LSB first: `hasH | c << 1 | u << 4 | w << 6`.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownlinkHeader {
    pub has_h: bool,
    pub c: B3,
    pub u: B2,
    pub w: B2,
}

/// Decoded downlink payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Downlink {
    pub w: u8,
    pub u: u8,
    pub c: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u8>,
}

impl Downlink {
    /// `h` is present only when the header flags it and a second byte exists.
    /// Returns `None` for an empty payload.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&b0, rest) = bytes.split_first()?;
        let header = DownlinkHeader::from_bytes([b0]);
        let h = if header.has_h() { rest.first().copied() } else { None };
        Some(Self {
            w: header.w(),
            u: header.u(),
            c: header.c(),
            h,
        })
    }
}

/// Pulls the binary payload out of a `+RECVB=<hex>` line (case-insensitive).
///
/// Non-hex characters after the marker are ignored, at least two hex digits must
/// remain, and a trailing odd digit is dropped.
pub fn extract_receive_payload(line: &str) -> Option<Vec<u8>> {
    let upper = line.to_ascii_uppercase();
    let start = upper.find(URC_RECEIVE_BINARY)? + URC_RECEIVE_BINARY.len();
    let mut digits: String = upper[start..].chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if digits.len() < 2 {
        return None;
    }
    digits.truncate(digits.len() & !1);
    hex::decode(digits).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uplink_without_etag() {
        let frame = UplinkFrame::new(5, None);
        assert_eq!(frame.to_hex(), "010500");
        assert_eq!(frame.command(), "AT+SENDB=010500");
    }

    #[test]
    fn test_uplink_hex_decodes_back() {
        for code in 0..=255u8 {
            for etag in std::iter::once(None).chain((0..=255u8).map(Some)) {
                let hex_str = UplinkFrame::new(code, etag).to_hex();
                let bytes = hex::decode(&hex_str).unwrap();
                assert_eq!(bytes, vec![0x01, code, etag.unwrap_or(0)]);
            }
        }
    }

    #[test]
    fn test_header_bit_layout() {
        let header = DownlinkHeader::from_bytes([0xA1]);
        assert_eq!(header.w(), 2);
        assert_eq!(header.u(), 2);
        assert_eq!(header.c(), 0);
        assert!(header.has_h());

        let header = DownlinkHeader::from_bytes([0b0110_1010]);
        assert_eq!(header.w(), 1);
        assert_eq!(header.u(), 2);
        assert_eq!(header.c(), 5);
        assert!(!header.has_h());
    }

    #[test]
    fn test_decode_all_header_bytes() {
        for b0 in 0..=255u8 {
            let one = Downlink::decode(&[b0]).unwrap();
            assert_eq!(one.w, b0 >> 6);
            assert_eq!(one.u, (b0 >> 4) & 0b11);
            assert_eq!(one.c, (b0 >> 1) & 0b111);
            assert_eq!(one.h, None);

            let two = Downlink::decode(&[b0, 0x42]).unwrap();
            assert_eq!(two.h.is_some(), b0 & 1 == 1);
        }
        assert_eq!(Downlink::decode(&[]), None);
    }

    #[test]
    fn test_decode_a100() {
        let dl = Downlink::decode(&[0xA1, 0x00]).unwrap();
        assert_eq!(dl, Downlink { w: 2, u: 2, c: 0, h: Some(0) });
    }

    #[test]
    fn test_extract_receive_payload() {
        assert_eq!(extract_receive_payload("+RECVB=A100"), Some(vec![0xA1, 0x00]));
        assert_eq!(extract_receive_payload("+recvb=a1 00"), Some(vec![0xA1, 0x00]));
        assert_eq!(extract_receive_payload("+RECVB=A10"), Some(vec![0xA1]));
        assert_eq!(extract_receive_payload("+RECVB=A"), None);
        assert_eq!(extract_receive_payload("+RECVB="), None);
        assert_eq!(extract_receive_payload("OK"), None);
    }

    #[test]
    fn test_serialized_shape_omits_absent_h() {
        let dl = Downlink { w: 1, u: 0, c: 3, h: None };
        assert_eq!(serde_json::to_string(&dl).unwrap(), r#"{"w":1,"u":0,"c":3}"#);
    }
}
