//! Per-connection WebSocket plumbing
//!
//! Each accepted signaling socket is split into a writer task draining an
//! unbounded channel and a reader loop feeding the peer adapter. Sends never
//! block the adapter; flow control is the transport's concern.

use crate::peer::AdapterHandle;
use crate::signaling::protocol::SignalMessage;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cloneable handle for sending frames down one signaling socket
#[derive(Clone)]
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<Message>,
    done: CancellationToken,
}

impl SocketHandle {
    /// Build a handle around an existing outbound channel
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            outbound,
            done: CancellationToken::new(),
        }
    }

    /// Spawn the writer task for the write half of an accepted socket
    pub fn spawn_writer(mut sink: SplitSink<WebSocketStream<TcpStream>, Message>) -> Self {
        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();
        let done = CancellationToken::new();
        let finished = done.clone();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "failed to send signaling frame");
                    break;
                }
                if closing {
                    break;
                }
            }
            debug!("signaling writer stopped");
            finished.cancel();
        });

        Self { outbound, done }
    }

    /// Queue a text frame; dropped silently once the socket is gone
    pub fn send_text(&self, text: String) {
        let _ = self.outbound.send(Message::Text(text));
    }

    /// Close the socket with a "going away" close frame
    pub fn close(&self, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: reason.into(),
        };
        let _ = self.outbound.send(Message::Close(Some(frame)));
    }

    /// Resolves once the writer has flushed its last frame and stopped
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }
}

/// Drive the read half of a signaling socket until it closes
///
/// Text frames are parsed and forwarded to the adapter; malformed frames and
/// non-text frames are logged and dropped without touching the connection.
pub async fn run_reader(mut stream: SplitStream<WebSocketStream<TcpStream>>, adapter: AdapterHandle) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                Ok(message) => adapter.inbound(message),
                Err(e) => {
                    warn!(peer = %adapter.id(), error = %e, "dropping malformed signaling message");
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(peer = %adapter.id(), "dropping non-text signaling frame");
            }
            Ok(Message::Close(_)) => {
                info!(peer = %adapter.id(), "signaling socket closed by remote");
                break;
            }
            // Ping/pong frames are handled by the transport
            Ok(_) => {}
            Err(e) => {
                warn!(peer = %adapter.id(), error = %e, "signaling socket error");
                break;
            }
        }
    }
}
