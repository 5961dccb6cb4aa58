// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::{BufMut, Bytes, BytesMut};

/// Fixed RTP header length for the profile this gateway speaks: no CSRC
/// list, no extension header.
pub const RTP_HEADER_SIZE: usize = 12;

const VERSION: u8 = 2;

/// Errors from RTP packet decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpError {
    /// Datagram shorter than the 12-byte header.
    MalformedPacket { len: usize },
}

impl std::fmt::Display for RtpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtpError::MalformedPacket { len } => {
                write!(
                    f,
                    "malformed RTP packet: {} bytes, need at least {}",
                    len, RTP_HEADER_SIZE
                )
            }
        }
    }
}

impl std::error::Error for RtpError {}

/// A single RTP packet: header fields plus the raw payload.
///
/// Only the fields that vary within this gateway's profile are stored;
/// version/padding/extension/CC are constants baked into the wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Builds an outgoing packet from header fields and payload bytes.
    ///
    /// `payload_type` is masked to its 7-bit wire width on encode.
    pub fn new(
        payload_type: u8,
        sequence: u16,
        timestamp: u32,
        ssrc: u32,
        marker: bool,
        payload: &[u8],
    ) -> Self {
        Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Serializes the packet: 12-byte big-endian header followed by the
    /// payload.
    ///
    /// Wire layout per RFC 3550 §5.1:
    /// byte 0 = version<<6 | padding<<5 | extension<<4 | cc,
    /// byte 1 = marker<<7 | payload_type, then seq (u16), timestamp (u32),
    /// ssrc (u32), all network byte order.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_SIZE + self.payload.len());
        buf.put_u8(VERSION << 6);
        buf.put_u8(u8::from(self.marker) << 7 | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parses an incoming packet, splitting header and payload.
    ///
    /// Fails with [`RtpError::MalformedPacket`] when fewer than 12 bytes are
    /// given; the caller drops such datagrams.
    pub fn decode(wire: &[u8]) -> Result<Self, RtpError> {
        if wire.len() < RTP_HEADER_SIZE {
            return Err(RtpError::MalformedPacket { len: wire.len() });
        }
        let (header, payload) = wire.split_at(RTP_HEADER_SIZE);
        Ok(Self {
            marker: header[1] & 0x80 != 0,
            payload_type: header[1] & 0x7F,
            sequence: u16::from_be_bytes([header[2], header[3]]),
            timestamp: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            ssrc: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_are_exact() {
        let pkt = RtpPacket::new(65, 1, 0, 0xDEAD_BEEF, false, b"");
        let wire = pkt.encode();
        assert_eq!(
            wire.as_ref(),
            &[0x80, 0x41, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn marker_sets_top_bit_of_byte_one() {
        let pkt = RtpPacket::new(0, 0, 0, 0, true, b"");
        assert_eq!(pkt.encode()[1], 0x80);
    }

    #[test]
    fn round_trips_all_fields() {
        let cases = [
            (0u8, 0u16, 0u32, 0u32, false),
            (127, 65535, u32::MAX, u32::MAX, true),
            (96, 4242, 160_000, 0x0000_0001, false),
        ];
        for (pt, seq, ts, ssrc, marker) in cases {
            let payload = vec![0xAB; 160];
            let pkt = RtpPacket::new(pt, seq, ts, ssrc, marker, &payload);
            let back = RtpPacket::decode(&pkt.encode()).unwrap();
            assert_eq!(back, pkt);
        }
    }

    #[test]
    fn decode_rejects_short_packet() {
        let err = RtpPacket::decode(&[0x80; 11]).unwrap_err();
        assert_eq!(err, RtpError::MalformedPacket { len: 11 });
    }

    #[test]
    fn decode_accepts_header_only_packet() {
        let pkt = RtpPacket::decode(&[0x80, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn payload_survives_round_trip() {
        let payload: Vec<u8> = (0..=255).collect();
        let pkt = RtpPacket::new(8, 100, 99, 1, false, &payload);
        let back = RtpPacket::decode(&pkt.encode()).unwrap();
        assert_eq!(back.payload.as_ref(), payload.as_slice());
    }
}
