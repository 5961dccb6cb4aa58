// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Signaling transport seam.
//!
//! The session machine never touches a socket directly; it talks
//! through [`Signaling`], so tests can drive it with an in-memory
//! fake and the daemon plugs in [`UdpSignaling`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{error, info};

/// One inbound signaling datagram with its source address.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub peer: SocketAddr,
    pub payload: Bytes,
}

/// Outbound half of a signaling transport.
#[async_trait]
pub trait Signaling: Send + Sync {
    async fn send(&self, to: SocketAddr, data: Bytes) -> Result<()>;
}

/// UDP signaling bound to the agent's local SIP address.
pub struct UdpSignaling {
    socket: Arc<UdpSocket>,
}

impl UdpSignaling {
    pub async fn bind(local: &str) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(UdpSignaling {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Runs the receive loop, forwarding datagrams to the session
    /// until the receiver side is dropped.
    pub async fn run(&self, tx: mpsc::UnboundedSender<InboundPacket>) -> Result<()> {
        let bind = self.socket.local_addr()?;
        info!(%bind, "listening (sip/udp)");
        let mut buf = vec![0u8; 65_535];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((n, peer)) => {
                    let packet = InboundPacket {
                        peer,
                        payload: Bytes::copy_from_slice(&buf[..n]),
                    };
                    if tx.send(packet).is_err() {
                        info!("session dropped; shutting down sip loop");
                        break;
                    }
                }
                Err(e) => {
                    error!(%e, "sip recv_from error");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Signaling for UdpSignaling {
    async fn send(&self, to: SocketAddr, data: Bytes) -> Result<()> {
        self.socket.send_to(&data, to).await?;
        Ok(())
    }
}
