// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

use smol_str::SmolStr;
use std::net::{AddrParseError, IpAddr, SocketAddr};

/// Negotiated remote media endpoint, extracted from the carrier's SDP offer.
///
/// `address_type` and `network_type` carry the SDP connection-line tokens
/// verbatim (e.g. `IP4` / `IN`) so the orchestrator can check them against
/// configuration before any media flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpAddress {
    pub port: u16,
    pub address: SmolStr,
    pub address_type: SmolStr,
    pub network_type: SmolStr,
}

impl RtpAddress {
    pub fn new(port: u16, address: &str, address_type: &str, network_type: &str) -> Self {
        Self {
            port,
            address: SmolStr::new(address),
            address_type: SmolStr::new(address_type),
            network_type: SmolStr::new(network_type),
        }
    }

    /// Resolves the address/port pair into a socket address for the sender
    /// loop.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let ip: IpAddr = self.address.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl std::fmt::Display for RtpAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}:{}",
            self.network_type, self.address_type, self.address, self.port
        )
    }
}
