// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP for the voicelink agent: message codec, digest registration,
//! the SDP subset the gateway negotiates with, and the per-agent UAS
//! session machine.
//!
//! The surface is deliberately narrow. This crate is not a general
//! SIP stack: it registers one identity, answers one INVITE dialog at
//! a time, and hands the negotiated remote RTP address to the media
//! layer.

mod auth;
mod builder;
mod msg;
mod parse;
mod sdp;
mod session;
mod signaling;

pub use auth::{digest_response, AuthError, DigestChallenge};
pub use builder::{RegisterBuilder, ALLOWED_METHODS};
pub use msg::{Header, Headers, Method, Request, Response};
pub use parse::{parse_request, parse_response, serialize_request, serialize_response};
pub use sdp::{SdpError, SessionDescription};
pub use session::{SessionHandle, SipSession};
pub use signaling::{InboundPacket, Signaling, UdpSignaling};
