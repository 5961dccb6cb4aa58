// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UDP loops that move raw RTP bytes between the network and the agent's
//! in-memory channels.
//!
//! Neither loop decodes RTP. The receiver pushes whatever arrives onto the
//! inbound channel; the sender drains the outbound channel into datagrams
//! addressed at the negotiated remote endpoint. Each loop owns a stop flag
//! checked once per iteration, so shutdown latency is bounded by the receive
//! timeout / poll interval rather than being instantaneous.

use anyhow::Result;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info};

/// Receive timeout; the loop wakes at least this often to observe its stop
/// flag.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);
/// Poll interval the sender waits on an empty outbound channel.
const SEND_POLL: Duration = Duration::from_millis(20);

/// Cooperative cancellation flag shared between a loop and its owner.
///
/// `trigger` is idempotent; the loop observes it on its next iteration.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// UDP receive loop: local RTP socket to inbound channel.
pub struct RtpReceiver {
    socket: UdpSocket,
    inbound: mpsc::UnboundedSender<Bytes>,
    recv_buf_size: usize,
    stop: StopFlag,
}

impl RtpReceiver {
    /// Binds the configured local RTP address.
    pub async fn bind(
        local: SocketAddr,
        recv_buf_size: usize,
        inbound: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        info!(bind = %socket.local_addr()?, "listening (rtp)");
        Ok(Self {
            socket,
            inbound,
            recv_buf_size,
            stop: StopFlag::new(),
        })
    }

    /// Address the socket actually bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Runs until the stop flag is set or the socket fails.
    ///
    /// Each datagram is pushed onto the inbound channel at its received
    /// length; oversized datagrams are truncated to the configured buffer
    /// size. Receive timeouts are not errors and simply re-loop.
    pub async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; self.recv_buf_size];
        while !self.stop.is_set() {
            match timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((n, _peer))) => {
                    if self.inbound.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        info!("inbound consumer dropped; stopping rtp receive loop");
                        break;
                    }
                }
                Ok(Err(e)) => {
                    error!(%e, "rtp recv error");
                    return Err(e.into());
                }
                Err(_) => continue,
            }
        }
        info!("rtp receive loop stopped");
        Ok(())
    }
}

/// UDP send loop: outbound channel to the negotiated remote RTP address.
pub struct RtpSender {
    remote: SocketAddr,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    stop: StopFlag,
}

impl RtpSender {
    pub fn new(remote: SocketAddr, outbound: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            remote,
            outbound,
            stop: StopFlag::new(),
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Runs until the stop flag is set, the channel closes, or the socket
    /// fails. Sends from an ephemeral local port.
    pub async fn run(mut self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        info!(remote = %self.remote, "starting rtp transmission");
        while !self.stop.is_set() {
            match timeout(SEND_POLL, self.outbound.recv()).await {
                Ok(Some(data)) => {
                    if let Err(e) = socket.send_to(&data, self.remote).await {
                        error!(%e, "rtp send error");
                        return Err(e.into());
                    }
                }
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        info!(remote = %self.remote, "rtp send loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn receiver_queues_datagrams_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = RtpReceiver::bind("127.0.0.1:0".parse().unwrap(), 268, tx)
            .await
            .unwrap();
        let target = receiver.local_addr().unwrap();
        let stop = receiver.stop_flag();
        let task = tokio::spawn(receiver.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for payload in [&b"a"[..], b"b", b"c"] {
            client.send_to(payload, target).await.unwrap();
        }

        for expected in [&b"a"[..], b"b", b"c"] {
            let got = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("recv timeout")
                .expect("channel closed");
            assert_eq!(got.as_ref(), expected);
        }

        stop.trigger();
        timeout(Duration::from_secs(3), task)
            .await
            .expect("stop timeout")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn receiver_keeps_only_received_length() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = RtpReceiver::bind("127.0.0.1:0".parse().unwrap(), 268, tx)
            .await
            .unwrap();
        let target = receiver.local_addr().unwrap();
        let stop = receiver.stop_flag();
        let task = tokio::spawn(receiver.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[0xFF; 20], target).await.unwrap();

        let got = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.len(), 20);

        stop.trigger();
        let _ = timeout(Duration::from_secs(3), task).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sender_forwards_to_remote() {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = sink.local_addr().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let sender = RtpSender::new(remote, rx);
        let stop = sender.stop_flag();
        let task = tokio::spawn(sender.run());

        tx.send(Bytes::from_static(b"hello")).unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = timeout(Duration::from_secs(2), sink.recv_from(&mut buf))
            .await
            .expect("recv timeout")
            .unwrap();
        assert_eq!(&buf[..n], b"hello");

        stop.trigger();
        let _ = timeout(Duration::from_secs(3), task).await;
    }

    #[test]
    fn stop_flag_is_idempotent() {
        let flag = StopFlag::new();
        assert!(!flag.is_set());
        flag.trigger();
        flag.trigger();
        assert!(flag.is_set());
    }
}
