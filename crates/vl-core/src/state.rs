// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared, lock-free agent state.
//!
//! Every task that cooperates on one agent (signaling session, media
//! loops, the bridge, the orchestrator) holds a clone of
//! [`SharedAgentState`] and reads the current [`SipState`] from an
//! atomic. Writes go through setters so every transition lands in the
//! log with the agent's name attached.

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;

use smol_str::SmolStr;
use tracing::info;

/// Lifecycle of a single agent's SIP leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SipState {
    /// No successful REGISTER yet.
    Unregistered = 0,
    /// Registrar accepted our binding; waiting for an INVITE.
    Registered = 1,
    /// The registrar rejected us with a non-401 failure. Terminal.
    RegistrationFailed = 2,
    /// INVITE received and ringing (180 sent), answer pending.
    Connecting = 3,
    /// 200 OK sent for the INVITE; media may flow.
    Connected = 4,
    /// Call torn down (BYE, CANCEL, or a local error).
    Disconnected = 5,
}

impl SipState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipState::Unregistered => "unregistered",
            SipState::Registered => "registered",
            SipState::RegistrationFailed => "registration-failed",
            SipState::Connecting => "connecting",
            SipState::Connected => "connected",
            SipState::Disconnected => "disconnected",
        }
    }

    fn from_u8(raw: u8) -> SipState {
        match raw {
            1 => SipState::Registered,
            2 => SipState::RegistrationFailed,
            3 => SipState::Connecting,
            4 => SipState::Connected,
            5 => SipState::Disconnected,
            _ => SipState::Unregistered,
        }
    }
}

impl std::fmt::Display for SipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Close-code value meaning "no close frame recorded yet".
pub const WS_CLOSE_NONE: u16 = 0;

#[derive(Debug)]
struct Inner {
    name: SmolStr,
    sip: AtomicU8,
    ws_close: AtomicU16,
}

/// Cloneable handle over one agent's runtime state.
#[derive(Debug, Clone)]
pub struct SharedAgentState {
    inner: Arc<Inner>,
}

impl SharedAgentState {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        SharedAgentState {
            inner: Arc::new(Inner {
                name: name.into(),
                sip: AtomicU8::new(SipState::Unregistered as u8),
                ws_close: AtomicU16::new(WS_CLOSE_NONE),
            }),
        }
    }

    pub fn name(&self) -> &SmolStr {
        &self.inner.name
    }

    pub fn sip_state(&self) -> SipState {
        SipState::from_u8(self.inner.sip.load(Ordering::SeqCst))
    }

    pub fn set_sip_state(&self, next: SipState) {
        let prev = SipState::from_u8(self.inner.sip.swap(next as u8, Ordering::SeqCst));
        if prev != next {
            info!(agent = %self.inner.name, from = %prev, to = %next, "sip state");
        }
    }

    /// Last websocket close code seen, or [`WS_CLOSE_NONE`].
    pub fn ws_close_code(&self) -> u16 {
        self.inner.ws_close.load(Ordering::SeqCst)
    }

    pub fn set_ws_close_code(&self, code: u16) {
        self.inner.ws_close.store(code, Ordering::SeqCst);
        info!(agent = %self.inner.name, code, "websocket close code");
    }

    pub fn clear_ws_close_code(&self) {
        self.inner.ws_close.store(WS_CLOSE_NONE, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unregistered_with_no_close_code() {
        let state = SharedAgentState::new("agent1");
        assert_eq!(state.sip_state(), SipState::Unregistered);
        assert_eq!(state.ws_close_code(), WS_CLOSE_NONE);
    }

    #[test]
    fn transitions_are_visible_across_clones() {
        let state = SharedAgentState::new("agent1");
        let observer = state.clone();
        state.set_sip_state(SipState::Registered);
        state.set_sip_state(SipState::Connecting);
        assert_eq!(observer.sip_state(), SipState::Connecting);
    }

    #[test]
    fn close_code_round_trips_and_clears() {
        let state = SharedAgentState::new("agent1");
        state.set_ws_close_code(1006);
        assert_eq!(state.ws_close_code(), 1006);
        state.clear_ws_close_code();
        assert_eq!(state.ws_close_code(), WS_CLOSE_NONE);
    }

    #[test]
    fn raw_round_trip_covers_every_state() {
        for s in [
            SipState::Unregistered,
            SipState::Registered,
            SipState::RegistrationFailed,
            SipState::Connecting,
            SipState::Connected,
            SipState::Disconnected,
        ] {
            assert_eq!(SipState::from_u8(s as u8), s);
        }
    }
}
