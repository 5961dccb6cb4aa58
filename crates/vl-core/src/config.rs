// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::Deserialize;
use smol_str::SmolStr;

/// RTP header length; the derived packet size is header + payload.
const RTP_HEADER_SIZE: usize = 12;

/// Complete configuration of one agent, read from a YAML file.
///
/// Immutable after construction. The dialog tag is generated locally at
/// deserialization time and the packet size is derived from the payload
/// size; neither appears in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub agent_name: SmolStr,
    /// SIP transport, e.g. "udp".
    pub transport_mode: SmolStr,

    pub sip_local_ip: SmolStr,
    pub sip_local_port: u16,
    pub sip_local_username: SmolStr,
    pub sip_local_realm: SmolStr,
    pub sip_local_display_name: SmolStr,

    pub sip_registrar_ip: SmolStr,
    pub sip_registrar_port: u16,

    pub sip_register_expiry_secs: u64,

    pub rtp_local_ip: SmolStr,
    pub rtp_local_port: u16,
    /// SDP address type expected from the carrier, e.g. "IP4".
    pub rtp_address_type: SmolStr,
    /// SDP network type expected from the carrier, e.g. "IN".
    pub rtp_network_type: SmolStr,
    pub rtp_payload_size: usize,
    /// Derived, not read from the file: header + payload.
    #[serde(skip, default)]
    rtp_packet_size: usize,

    pub ws_server_uri: SmolStr,

    pub password: SmolStr,

    /// Local dialog tag, generated once per config.
    #[serde(skip, default = "generate_tag")]
    sip_local_tag: SmolStr,
}

impl AgentConfig {
    /// Fixes the derived packet size; the daemon calls this once after
    /// deserialization.
    pub fn finalize(mut self) -> Self {
        self.rtp_packet_size = RTP_HEADER_SIZE + self.rtp_payload_size;
        self
    }

    pub fn rtp_packet_size(&self) -> usize {
        self.rtp_packet_size
    }

    pub fn sip_local_tag(&self) -> &SmolStr {
        &self.sip_local_tag
    }

    pub fn sip_local_addr(&self) -> String {
        format!("{}:{}", self.sip_local_ip, self.sip_local_port)
    }

    pub fn sip_registrar_addr(&self) -> String {
        format!("{}:{}", self.sip_registrar_ip, self.sip_registrar_port)
    }

    pub fn rtp_local_addr(&self) -> String {
        format!("{}:{}", self.rtp_local_ip, self.rtp_local_port)
    }
}

/// Localhost defaults, mostly useful for tests and demos; real deployments
/// load every field from YAML.
impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: SmolStr::new("agent1"),
            transport_mode: SmolStr::new("udp"),
            sip_local_ip: SmolStr::new("127.0.0.1"),
            sip_local_port: 5061,
            sip_local_username: SmolStr::new("alice"),
            sip_local_realm: SmolStr::new("example.com"),
            sip_local_display_name: SmolStr::new("Alice"),
            sip_registrar_ip: SmolStr::new("127.0.0.1"),
            sip_registrar_port: 5060,
            sip_register_expiry_secs: 600,
            rtp_local_ip: SmolStr::new("127.0.0.1"),
            rtp_local_port: 6022,
            rtp_address_type: SmolStr::new("IP4"),
            rtp_network_type: SmolStr::new("IN"),
            rtp_payload_size: 256,
            rtp_packet_size: 0,
            ws_server_uri: SmolStr::new("ws://127.0.0.1:8080/audio"),
            password: SmolStr::new("secret"),
            sip_local_tag: generate_tag(),
        }
        .finalize()
    }
}

fn generate_tag() -> SmolStr {
    let tag: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    SmolStr::new(tag)
}
