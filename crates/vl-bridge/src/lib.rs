// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Websocket media bridge to the voice-bot backend.
//!
//! One bridge per agent. Binary frames from the backend land on the
//! inbound queue handed out at construction; [`MediaBridge::send`]
//! pushes audio the other way. The bridge itself never decides
//! whether to reconnect: it records the close code it observed in
//! [`SharedAgentState`] and reports `NotConnected` on send, and the
//! orchestrator applies the reconnect policy. [`reconnect`] reuses
//! the same inbound queue, so a reconnect is invisible to the
//! consumer side.
//!
//! [`reconnect`]: MediaBridge::reconnect

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use smol_str::SmolStr;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use vl_core::SharedAgentState;

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Close code recorded when the peer vanished without a close frame.
/// The orchestrator treats exactly this code as transient.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Close code recorded for a close frame that carried no status.
const NO_STATUS_CLOSE_CODE: u16 = 1005;

#[derive(Debug)]
pub enum BridgeError {
    /// No live connection. Distinguished so the caller can decide
    /// whether the last close code warrants a reconnect.
    NotConnected,
    Transport(tokio_tungstenite::tungstenite::Error),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::NotConnected => write!(f, "bridge is not connected"),
            BridgeError::Transport(e) => write!(f, "bridge transport error: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::Transport(e)
    }
}

pub struct MediaBridge {
    uri: SmolStr,
    state: SharedAgentState,
    sink: Arc<Mutex<Option<WsSink>>>,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
}

impl MediaBridge {
    /// Creates an unconnected bridge and the queue its binary frames
    /// will arrive on. The queue survives reconnects.
    pub fn new(
        uri: impl Into<SmolStr>,
        state: SharedAgentState,
    ) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = MediaBridge {
            uri: uri.into(),
            state,
            sink: Arc::new(Mutex::new(None)),
            inbound_tx: tx,
        };
        (bridge, rx)
    }

    /// Dials the backend and starts the read pump.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let (ws, response) = connect_async(self.uri.as_str()).await?;
        info!(
            agent = %self.state.name(),
            uri = %self.uri,
            status = %response.status(),
            "bridge connected"
        );
        self.state.clear_ws_close_code();

        let (sink, stream) = ws.split();
        {
            let mut guard = self.sink.lock().await;
            if let Some(mut old) = guard.replace(sink) {
                let _ = old.close().await;
            }
        }

        tokio::spawn(read_pump(
            stream,
            self.inbound_tx.clone(),
            self.state.clone(),
            self.sink.clone(),
        ));
        Ok(())
    }

    /// Re-establishes the connection on the same inbound queue.
    pub async fn reconnect(&self) -> Result<(), BridgeError> {
        info!(agent = %self.state.name(), uri = %self.uri, "bridge reconnecting");
        self.connect().await
    }

    /// Forwards one binary frame to the backend.
    pub async fn send(&self, data: Bytes) -> Result<(), BridgeError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(BridgeError::NotConnected)?;
        match sink.send(Message::Binary(data.to_vec())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed sink is dead; drop it so the next send
                // reports NotConnected instead of erroring again.
                *guard = None;
                Err(BridgeError::Transport(e))
            }
        }
    }

    /// Sends a close frame and forgets the connection. Safe to call
    /// when already disconnected.
    pub async fn close(&self) {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "session ended".into(),
                })))
                .await;
            let _ = sink.close().await;
        }
    }
}

/// Drains the websocket until it closes, forwarding binary frames and
/// recording the close code for the orchestrator's reconnect decision.
async fn read_pump(
    mut stream: WsStream,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    state: SharedAgentState,
    sink: Arc<Mutex<Option<WsSink>>>,
) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                if inbound_tx.send(Bytes::from(data)).is_err() {
                    debug!(agent = %state.name(), "inbound queue dropped; stopping read pump");
                    break;
                }
            }
            Some(Ok(Message::Text(_))) => {
                debug!(agent = %state.name(), "ignoring text frame from backend");
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame
                    .map(|f| u16::from(f.code))
                    .unwrap_or(NO_STATUS_CLOSE_CODE);
                state.set_ws_close_code(code);
                break;
            }
            Some(Ok(_)) => {} // ping/pong handled by the protocol layer
            Some(Err(e)) => {
                warn!(agent = %state.name(), error = %e, "bridge read error");
                state.set_ws_close_code(ABNORMAL_CLOSE_CODE);
                break;
            }
            None => {
                state.set_ws_close_code(ABNORMAL_CLOSE_CODE);
                break;
            }
        }
    }
    sink.lock().await.take();
}
