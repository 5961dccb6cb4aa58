// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Agent orchestration: ties the SIP session, RTP transport and
//! websocket bridge into one call lifecycle, and manages a fleet of
//! such agents for the daemon.

mod agent;
mod manager;

pub use agent::{AgentError, AgentOrchestrator};
pub use manager::{AgentManager, AgentStatus};
