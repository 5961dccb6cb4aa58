// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-agent SIP session machine.
//!
//! One task owns the whole signaling lifecycle: periodic REGISTER
//! with digest retry, then UAS handling of a single
//! INVITE→ACK→BYE/CANCEL dialog. The negotiated remote RTP address is
//! published to the orchestrator through a oneshot channel, exactly
//! once per session.
//!
//! State lives in [`SharedAgentState`] so the media loops and the
//! control plane observe transitions as they happen.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use vl_core::{AgentConfig, SharedAgentState, SipState};
use vl_rtp::RtpAddress;

use crate::builder::{RegisterBuilder, ALLOWED_METHODS};
use crate::msg::{Method, Request, Response};
use crate::parse::{parse_request, parse_response, serialize_request, serialize_response};
use crate::sdp::SessionDescription;
use crate::signaling::{InboundPacket, Signaling};

/// Channels the orchestrator keeps after spawning a session.
pub struct SessionHandle {
    /// Feed inbound signaling datagrams here.
    pub inbound: mpsc::UnboundedSender<InboundPacket>,
    /// Resolves once with the caller's negotiated RTP address.
    pub remote_rtp: oneshot::Receiver<RtpAddress>,
}

pub struct SipSession<S> {
    config: Arc<AgentConfig>,
    state: SharedAgentState,
    signaling: Arc<S>,
    register: RegisterBuilder,
    registrar: SocketAddr,
    inbound: mpsc::UnboundedReceiver<InboundPacket>,
    remote_rtp: Option<oneshot::Sender<RtpAddress>>,
    pending_invite: Option<Request>,
    dialog_confirmed: bool,
}

impl<S: Signaling> SipSession<S> {
    pub fn new(
        config: Arc<AgentConfig>,
        state: SharedAgentState,
        signaling: Arc<S>,
    ) -> Result<(Self, SessionHandle)> {
        let registrar = config
            .sip_registrar_addr()
            .parse()
            .context("invalid registrar address")?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (rtp_tx, rtp_rx) = oneshot::channel();

        let session = SipSession {
            register: RegisterBuilder::new(config.clone()),
            config,
            state,
            signaling,
            registrar,
            inbound: inbound_rx,
            remote_rtp: Some(rtp_tx),
            pending_invite: None,
            dialog_confirmed: false,
        };
        let handle = SessionHandle {
            inbound: inbound_tx,
            remote_rtp: rtp_rx,
        };
        Ok((session, handle))
    }

    /// Runs until the session disconnects, registration fails for
    /// good, or the signaling loop drops the inbound channel.
    pub async fn run(mut self) -> Result<()> {
        // First tick fires immediately, then every expiry/2.
        let period = Duration::from_secs((self.config.sip_register_expiry_secs / 2).max(1));
        let mut register_timer = interval(period);
        register_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = register_timer.tick() => {
                    let req = self.register.register();
                    self.send_request(&req).await?;
                }
                packet = self.inbound.recv() => {
                    let Some(packet) = packet else {
                        debug!(agent = %self.state.name(), "signaling channel closed");
                        break;
                    };
                    if self.dispatch(packet).await?.is_break() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, packet: InboundPacket) -> Result<ControlFlow<()>> {
        if let Some(req) = parse_request(&packet.payload) {
            return self.handle_request(req, packet.peer).await;
        }
        if let Some(res) = parse_response(&packet.payload) {
            return self.handle_response(res).await;
        }
        warn!(agent = %self.state.name(), peer = %packet.peer, "discarding malformed signaling datagram");
        Ok(ControlFlow::Continue(()))
    }

    async fn handle_request(&mut self, req: Request, peer: SocketAddr) -> Result<ControlFlow<()>> {
        match req.method.clone() {
            Method::Invite => {
                if self.state.sip_state() != SipState::Registered {
                    warn!(
                        agent = %self.state.name(),
                        state = %self.state.sip_state(),
                        "dropping INVITE outside registered state"
                    );
                    return Ok(ControlFlow::Continue(()));
                }
                if let Err(e) = self.accept_invite(req, peer).await {
                    warn!(agent = %self.state.name(), error = %e, "INVITE handling failed");
                    self.state.set_sip_state(SipState::Disconnected);
                    return Ok(ControlFlow::Break(()));
                }
                Ok(ControlFlow::Continue(()))
            }
            Method::Ack => {
                debug!(agent = %self.state.name(), "dialog confirmed");
                self.dialog_confirmed = true;
                self.pending_invite = None;
                Ok(ControlFlow::Continue(()))
            }
            Method::Bye => {
                self.respond(&req, 200, "OK", peer, false).await?;
                self.state.set_sip_state(SipState::Disconnected);
                Ok(ControlFlow::Break(()))
            }
            Method::Cancel => {
                self.respond(&req, 200, "OK", peer, false).await?;
                if self.dialog_confirmed {
                    return Ok(ControlFlow::Continue(()));
                }
                if let Some(invite) = self.pending_invite.take() {
                    self.respond(&invite, 487, "Request Terminated", peer, false)
                        .await?;
                }
                self.state.set_sip_state(SipState::Disconnected);
                Ok(ControlFlow::Break(()))
            }
            Method::Register | Method::Unknown(_) => {
                info!(agent = %self.state.name(), method = %req.method, "ignoring unsupported request");
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    /// 180, then SDP negotiation, then 200 with Contact. The remote
    /// address is published on the first successful negotiation only.
    async fn accept_invite(&mut self, req: Request, peer: SocketAddr) -> Result<()> {
        self.state.set_sip_state(SipState::Connecting);
        self.respond(&req, 180, "Ringing", peer, false).await?;

        let offer = std::str::from_utf8(&req.body).context("SDP offer is not UTF-8")?;
        let remote = SessionDescription::parse(offer)
            .remote_rtp_address()
            .context("cannot derive remote RTP address")?;

        self.respond(&req, 200, "OK", peer, true).await?;
        self.state.set_sip_state(SipState::Connected);
        self.dialog_confirmed = false;
        self.pending_invite = Some(req);

        if let Some(tx) = self.remote_rtp.take() {
            info!(agent = %self.state.name(), remote = %remote, "negotiated remote RTP address");
            let _ = tx.send(remote);
        }
        Ok(())
    }

    async fn handle_response(&mut self, res: Response) -> Result<ControlFlow<()>> {
        let is_register = res
            .headers
            .get("CSeq")
            .map(|v| v.to_ascii_uppercase().ends_with("REGISTER"))
            .unwrap_or(false);
        if !is_register {
            info!(agent = %self.state.name(), code = res.code, "ignoring non-REGISTER response");
            return Ok(ControlFlow::Continue(()));
        }

        match res.code {
            code if (200..300).contains(&code) => {
                self.state.set_sip_state(SipState::Registered);
                Ok(ControlFlow::Continue(()))
            }
            401 => match self.register.register_with_credentials(&res) {
                Ok(retry) => {
                    self.send_request(&retry).await?;
                    Ok(ControlFlow::Continue(()))
                }
                Err(e) => {
                    warn!(agent = %self.state.name(), error = %e, "registration challenge not answerable");
                    self.state.set_sip_state(SipState::RegistrationFailed);
                    Ok(ControlFlow::Break(()))
                }
            },
            code => {
                warn!(agent = %self.state.name(), code, "registration rejected");
                self.state.set_sip_state(SipState::RegistrationFailed);
                Ok(ControlFlow::Break(()))
            }
        }
    }

    /// Builds a UAS response by mirroring the dialog headers of `req`.
    async fn respond(
        &self,
        req: &Request,
        code: u16,
        reason: &str,
        peer: SocketAddr,
        with_contact: bool,
    ) -> Result<()> {
        let mut res = Response::new(code, reason);
        for via in req.headers.get_all("Via") {
            res.headers.push("Via", via.clone());
        }
        if let Some(from) = req.headers.get("From") {
            res.headers.push("From", from.clone());
        }
        if let Some(to) = req.headers.get("To") {
            let to = if to.contains("tag=") {
                to.clone()
            } else {
                format!("{};tag={}", to, self.config.sip_local_tag()).into()
            };
            res.headers.push("To", to);
        }
        if let Some(call_id) = req.headers.get("Call-ID") {
            res.headers.push("Call-ID", call_id.clone());
        }
        if let Some(cseq) = req.headers.get("CSeq") {
            res.headers.push("CSeq", cseq.clone());
        }
        if with_contact {
            res.headers.push(
                "Contact",
                format!(
                    "<sip:{}@{}:{}>",
                    self.config.sip_local_username,
                    self.config.sip_local_ip,
                    self.config.sip_local_port
                ),
            );
            res.headers.push("Allow", ALLOWED_METHODS);
        }
        self.signaling
            .send(peer, serialize_response(&res))
            .await
            .context("sending response")
    }

    async fn send_request(&self, req: &Request) -> Result<()> {
        debug!(agent = %self.state.name(), method = %req.method, "sending request");
        self.signaling
            .send(self.registrar, serialize_request(req))
            .await
            .context("sending request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::time::timeout;

    struct FakeSignaling {
        sent: mpsc::UnboundedSender<(SocketAddr, Bytes)>,
    }

    #[async_trait]
    impl Signaling for FakeSignaling {
        async fn send(&self, to: SocketAddr, data: Bytes) -> Result<()> {
            self.sent.send((to, data)).ok();
            Ok(())
        }
    }

    struct Harness {
        state: SharedAgentState,
        handle: SessionHandle,
        sent: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>,
        peer: SocketAddr,
    }

    fn spawn_session() -> Harness {
        spawn_session_with(AgentConfig::default())
    }

    fn spawn_session_with(config: AgentConfig) -> Harness {
        let config = Arc::new(config);
        let state = SharedAgentState::new(config.agent_name.clone());
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (session, handle) = SipSession::new(
            config,
            state.clone(),
            Arc::new(FakeSignaling { sent: sent_tx }),
        )
        .unwrap();
        tokio::spawn(session.run());
        Harness {
            state,
            handle,
            sent: sent_rx,
            peer: "10.0.0.9:5060".parse().unwrap(),
        }
    }

    impl Harness {
        async fn next_sent(&mut self) -> String {
            let (_, data) = timeout(Duration::from_secs(2), self.sent.recv())
                .await
                .expect("timed out waiting for outbound message")
                .expect("session closed send channel");
            String::from_utf8(data.to_vec()).unwrap()
        }

        fn push(&self, payload: &str) {
            self.handle
                .inbound
                .send(InboundPacket {
                    peer: self.peer,
                    payload: Bytes::copy_from_slice(payload.as_bytes()),
                })
                .unwrap();
        }

        async fn register(&mut self) {
            let register = self.next_sent().await;
            assert!(register.starts_with("REGISTER sip:127.0.0.1:5060 SIP/2.0\r\n"));
            self.push("SIP/2.0 200 OK\r\nCSeq: 1 REGISTER\r\n\r\n");
            wait_for_state(&self.state, SipState::Registered).await;
        }

        async fn invite(&mut self) {
            let sdp = "v=0\r\nc=IN IP4 10.0.0.9\r\nm=audio 49170 RTP/AVP 0\r\n";
            self.push(&format!(
                "INVITE sip:alice@127.0.0.1 SIP/2.0\r\n\
                 Via: SIP/2.0/UDP 10.0.0.9:5060;branch=z9hG4bKtest\r\n\
                 From: <sip:bob@10.0.0.9>;tag=remote1\r\n\
                 To: <sip:alice@127.0.0.1>\r\n\
                 Call-ID: call7\r\n\
                 CSeq: 1 INVITE\r\n\
                 Content-Length: {}\r\n\r\n{}",
                sdp.len(),
                sdp
            ));
        }
    }

    async fn wait_for_state(state: &SharedAgentState, expected: SipState) {
        timeout(Duration::from_secs(2), async {
            while state.sip_state() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "state never reached {}, stuck at {}",
                expected,
                state.sip_state()
            )
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn registers_immediately_on_start() {
        let mut h = spawn_session();
        let register = h.next_sent().await;
        assert!(register.contains("CSeq: 1 REGISTER\r\n"));
        assert!(register.contains("Expires: 600\r\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn challenge_gets_one_credentialed_retry() {
        let mut h = spawn_session();
        let first = h.next_sent().await;
        assert!(!first.contains("Authorization:"));

        h.push(
            "SIP/2.0 401 Unauthorized\r\n\
             CSeq: 1 REGISTER\r\n\
             WWW-Authenticate: Digest realm=\"example.com\", nonce=\"abc123\"\r\n\r\n",
        );
        let retry = h.next_sent().await;
        assert!(retry.contains("Authorization: Digest username=\"alice\""));
        assert!(retry.contains("CSeq: 2 REGISTER\r\n"));

        h.push("SIP/2.0 200 OK\r\nCSeq: 2 REGISTER\r\n\r\n");
        wait_for_state(&h.state, SipState::Registered).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_401_rejection_is_terminal() {
        let mut h = spawn_session();
        let _ = h.next_sent().await;
        h.push("SIP/2.0 403 Forbidden\r\nCSeq: 1 REGISTER\r\n\r\n");
        wait_for_state(&h.state, SipState::RegistrationFailed).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invite_rings_answers_and_publishes_address_once() {
        let mut h = spawn_session();
        h.register().await;
        h.invite().await;

        let ringing = h.next_sent().await;
        assert!(ringing.starts_with("SIP/2.0 180 Ringing\r\n"));
        assert!(ringing.contains("Call-ID: call7\r\n"));

        let ok = h.next_sent().await;
        assert!(ok.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(ok.contains("Contact: <sip:alice@127.0.0.1:5061>\r\n"));
        assert!(ok.contains("To: <sip:alice@127.0.0.1>;tag="));

        let remote = h.handle.remote_rtp.await.unwrap();
        assert_eq!(remote.port, 49170);
        assert_eq!(remote.address.as_str(), "10.0.0.9");
        wait_for_state(&h.state, SipState::Connected).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_invite_while_connected_is_dropped() {
        let mut h = spawn_session();
        h.register().await;
        h.invite().await;
        let _ringing = h.next_sent().await;
        let _ok = h.next_sent().await;
        wait_for_state(&h.state, SipState::Connected).await;

        h.invite().await;
        // Still connected, and nothing was sent for the second INVITE.
        h.push("BYE sip:alice@127.0.0.1 SIP/2.0\r\nCall-ID: call7\r\nCSeq: 2 BYE\r\n\r\n");
        let next = h.next_sent().await;
        assert!(next.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(next.contains("CSeq: 2 BYE\r\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bye_without_invite_disconnects() {
        // Short expiry so a live refresh timer would fire within the test.
        let mut config = AgentConfig::default();
        config.sip_register_expiry_secs = 2;
        let mut h = spawn_session_with(config);
        h.register().await;
        h.push("BYE sip:alice@127.0.0.1 SIP/2.0\r\nCall-ID: call7\r\nCSeq: 1 BYE\r\n\r\n");
        let ok = h.next_sent().await;
        assert!(ok.starts_with("SIP/2.0 200 OK\r\n"));
        wait_for_state(&h.state, SipState::Disconnected).await;
        // The refresh period is 1s; a disconnected session must send
        // no further REGISTER.
        match timeout(Duration::from_millis(1500), h.sent.recv()).await {
            Err(_) | Ok(None) => {}
            Ok(Some((_, data))) => panic!(
                "message sent after disconnect: {}",
                String::from_utf8_lossy(&data)
            ),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_before_ack_terminates_pending_invite() {
        let mut h = spawn_session();
        h.register().await;
        h.invite().await;
        let _ringing = h.next_sent().await;
        let _ok = h.next_sent().await;

        h.push("CANCEL sip:alice@127.0.0.1 SIP/2.0\r\nCall-ID: call7\r\nCSeq: 1 CANCEL\r\n\r\n");
        let cancel_ok = h.next_sent().await;
        assert!(cancel_ok.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(cancel_ok.contains("CSeq: 1 CANCEL\r\n"));

        let terminated = h.next_sent().await;
        assert!(terminated.starts_with("SIP/2.0 487 Request Terminated\r\n"));
        assert!(terminated.contains("CSeq: 1 INVITE\r\n"));
        wait_for_state(&h.state, SipState::Disconnected).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_after_ack_leaves_call_up() {
        let mut h = spawn_session();
        h.register().await;
        h.invite().await;
        let _ringing = h.next_sent().await;
        let _ok = h.next_sent().await;
        h.push("ACK sip:alice@127.0.0.1 SIP/2.0\r\nCall-ID: call7\r\nCSeq: 1 ACK\r\n\r\n");

        h.push("CANCEL sip:alice@127.0.0.1 SIP/2.0\r\nCall-ID: call7\r\nCSeq: 1 CANCEL\r\n\r\n");
        let cancel_ok = h.next_sent().await;
        assert!(cancel_ok.starts_with("SIP/2.0 200 OK\r\n"));
        assert_eq!(h.state.sip_state(), SipState::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invite_with_broken_sdp_disconnects() {
        let mut h = spawn_session();
        h.register().await;
        h.push(
            "INVITE sip:alice@127.0.0.1 SIP/2.0\r\n\
             Call-ID: call7\r\nCSeq: 1 INVITE\r\n\r\n",
        );
        let _ringing = h.next_sent().await;
        wait_for_state(&h.state, SipState::Disconnected).await;
    }
}
