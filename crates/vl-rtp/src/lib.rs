// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RTP media layer: packet codec (RFC 3550 subset) and UDP transport loops.
//!
//! The codec is pure encode/decode with no I/O. The transport loops move raw
//! datagram bytes between the network and in-memory channels; they never
//! decode RTP themselves. Consumers that need header fields decode
//! explicitly.
//!
//! # Example
//! ```
//! use vl_rtp::RtpPacket;
//!
//! let pkt = RtpPacket::new(0, 7, 160, 0x1234_5678, false, b"audio");
//! let wire = pkt.encode();
//! let back = RtpPacket::decode(&wire).unwrap();
//! assert_eq!(back.sequence, 7);
//! ```

mod address;
mod codec;
pub mod transport;

pub use address::RtpAddress;
pub use codec::{RtpError, RtpPacket, RTP_HEADER_SIZE};
pub use transport::{RtpReceiver, RtpSender};
