// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-agent control loop.
//!
//! [`AgentOrchestrator::run`] wires one call together: signaling
//! first, and no media socket touches the wire until the session has
//! negotiated the caller's RTP address. Audio then flows
//! caller→receiver→bridge and backend→sender→caller until the session
//! disconnects.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use vl_bridge::{BridgeError, MediaBridge, ABNORMAL_CLOSE_CODE};
use vl_core::{AgentConfig, SharedAgentState, SipState};
use vl_rtp::{RtpReceiver, RtpSender};
use vl_sip::{SipSession, UdpSignaling};

/// How long the relay loop waits on the inbound RTP queue before
/// re-checking the session state.
const RELAY_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, PartialEq, Eq)]
pub enum AgentError {
    /// The negotiated SDP address family disagrees with configuration.
    AddressTypeMismatch {
        expected: SmolStr,
        negotiated: SmolStr,
    },
    /// The session ended (registration failure or shutdown) before an
    /// INVITE ever negotiated a remote address.
    SessionEndedBeforeCall,
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::AddressTypeMismatch {
                expected,
                negotiated,
            } => write!(
                f,
                "negotiated address family {} does not match configured {}",
                negotiated, expected
            ),
            AgentError::SessionEndedBeforeCall => {
                write!(f, "session ended before a call was established")
            }
        }
    }
}

impl std::error::Error for AgentError {}

pub struct AgentOrchestrator {
    config: Arc<AgentConfig>,
    state: SharedAgentState,
}

impl AgentOrchestrator {
    pub fn new(config: Arc<AgentConfig>, state: SharedAgentState) -> Self {
        AgentOrchestrator { config, state }
    }

    pub fn state(&self) -> &SharedAgentState {
        &self.state
    }

    /// Runs one complete call lifecycle. Returns once the session
    /// disconnects, registration fails, or a fatal media error occurs.
    pub async fn run(&self) -> Result<()> {
        let config = &self.config;

        let signaling = Arc::new(
            UdpSignaling::bind(&config.sip_local_addr())
                .await
                .context("binding sip socket")?,
        );
        let (session, handle) =
            SipSession::new(config.clone(), self.state.clone(), signaling.clone())?;

        let reader = signaling.clone();
        let inbound = handle.inbound.clone();
        tokio::spawn(async move { reader.run(inbound).await });
        let session_task = tokio::spawn(session.run());

        // No media before the session has a negotiated address.
        let remote = match handle.remote_rtp.await {
            Ok(remote) => remote,
            Err(_) => {
                session_task.abort();
                return Err(AgentError::SessionEndedBeforeCall.into());
            }
        };
        if remote.address_type != config.rtp_address_type
            || remote.network_type != config.rtp_network_type
        {
            session_task.abort();
            return Err(AgentError::AddressTypeMismatch {
                expected: config.rtp_address_type.clone(),
                negotiated: remote.address_type.clone(),
            }
            .into());
        }
        let remote_addr = remote
            .socket_addr()
            .context("negotiated RTP address is not a valid socket address")?;

        let (rtp_in_tx, mut rtp_in) = mpsc::unbounded_channel();
        let receiver = RtpReceiver::bind(
            config
                .rtp_local_addr()
                .parse()
                .context("invalid local rtp address")?,
            config.rtp_packet_size(),
            rtp_in_tx,
        )
        .await
        .context("binding rtp socket")?;
        let receiver_stop = receiver.stop_flag();
        tokio::spawn(receiver.run());

        let (bridge, backend_frames) =
            MediaBridge::new(config.ws_server_uri.clone(), self.state.clone());
        bridge
            .connect()
            .await
            .map_err(anyhow::Error::from)
            .context("connecting media bridge")?;

        let sender = RtpSender::new(remote_addr, backend_frames);
        let sender_stop = sender.stop_flag();
        tokio::spawn(sender.run());

        info!(agent = %self.state.name(), remote = %remote, "media path up, relaying");
        let result = self.relay(&bridge, &mut rtp_in).await;

        receiver_stop.trigger();
        sender_stop.trigger();
        bridge.close().await;
        session_task.abort();
        result
    }

    /// Steady state: move caller audio to the backend until the
    /// session disconnects. A bridge that dropped with close code 1006
    /// gets one reconnect attempt per failed send; the frame that hit
    /// the dead bridge is dropped, not replayed.
    async fn relay(
        &self,
        bridge: &MediaBridge,
        rtp_in: &mut mpsc::UnboundedReceiver<Bytes>,
    ) -> Result<()> {
        while self.state.sip_state() != SipState::Disconnected {
            let packet = match timeout(RELAY_POLL, rtp_in.recv()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(packet)) => packet,
            };

            match bridge.send(packet).await {
                Ok(()) => {}
                Err(err) if reconnectable(&self.state, &err) => {
                    warn!(agent = %self.state.name(), %err, "bridge dropped abnormally, reconnecting");
                    bridge
                        .reconnect()
                        .await
                        .map_err(anyhow::Error::from)
                        .context("reconnecting media bridge")?;
                }
                Err(e) => {
                    return Err(anyhow::Error::from(e).context("forwarding audio to backend"));
                }
            }
        }
        info!(agent = %self.state.name(), "relay loop finished");
        Ok(())
    }
}

/// A failed send may be retried over a fresh connection only when the
/// read pump has recorded an abnormal peer drop. The error variant is
/// not decisive: the send can race the pump and hit the still-installed
/// sink, failing with a transport error instead of `NotConnected`.
fn reconnectable(state: &SharedAgentState, err: &BridgeError) -> bool {
    match err {
        BridgeError::NotConnected | BridgeError::Transport(_) => {
            state.ws_close_code() == ABNORMAL_CLOSE_CODE
        }
    }
}
