// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared agent configuration and cross-task state.
//!
//! [`AgentConfig`] is loaded once (the daemon reads it from YAML) and lent by
//! `Arc` to every component. [`SharedAgentState`] is the only mutable state
//! touched by more than one task per agent: the SIP lifecycle state and the
//! last observed websocket close code, both atomics whose writes are logged
//! as transitions.

mod config;
mod state;

pub use config::AgentConfig;
pub use state::{SharedAgentState, SipState, WS_CLOSE_NONE};
