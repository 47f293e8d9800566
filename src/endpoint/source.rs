//! Source endpoint
//!
//! Accepts at most one screen-capture peer at a time. A second source is
//! turned away with a "going away" close; the active source is untouched.

use crate::fanout::FanOut;
use crate::media::{MediaFactory, SourceTrack};
use crate::peer::{AdapterHandle, PeerAdapter, TrackCallback};
use crate::signaling::socket::{run_reader, SocketHandle};
use crate::signaling::Endpoint;
use futures::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Longest wait for a closing peer to flush its close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

struct ActiveSource {
    id: Uuid,
    socket: SocketHandle,
    adapter: AdapterHandle,
}

/// Singleton endpoint for the screen-capture peer
pub struct SourceEndpoint {
    factory: Arc<MediaFactory>,
    fanout: FanOut,
    current: Mutex<Option<ActiveSource>>,
}

impl SourceEndpoint {
    pub fn new(factory: Arc<MediaFactory>, fanout: FanOut) -> Arc<Self> {
        Arc::new(Self {
            factory,
            fanout,
            current: Mutex::new(None),
        })
    }

    async fn serve(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(%peer_addr, error = %e, "websocket handshake failed");
                return;
            }
        };

        let (write, read) = ws.split();
        let socket = SocketHandle::spawn_writer(write);

        let mut slot = self.current.lock().await;
        if slot.is_some() {
            warn!(%peer_addr, "rejecting source connection; one already exists");
            socket.close("source already connected");
            return;
        }

        let fanout = self.fanout.clone();
        let on_track: TrackCallback = Box::new(move |peer, remote| {
            fanout.set_active(SourceTrack::start(peer, remote));
        });

        let adapter =
            match PeerAdapter::spawn(&self.factory, socket.clone(), "source", on_track).await {
                Ok(adapter) => adapter,
                Err(e) => {
                    error!(%peer_addr, error = %e, "failed to create source peer");
                    socket.close("internal error");
                    return;
                }
            };

        let id = adapter.id();
        *slot = Some(ActiveSource {
            id,
            socket,
            adapter: adapter.clone(),
        });
        drop(slot);

        info!(%peer_addr, source = %id, "source connected");
        run_reader(read, adapter.clone()).await;

        let mut slot = self.current.lock().await;
        if slot.as_ref().map(|active| active.id) == Some(id) {
            *slot = None;
            warn!(source = %id, "source disconnected");
            adapter.close();
            self.fanout.clear_active();
        }
    }
}

impl Endpoint for SourceEndpoint {
    fn handle(
        self: Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self.serve(stream, peer_addr))
    }

    fn close_all(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let active = self.current.lock().await.take();
            if let Some(active) = active {
                info!(source = %active.id, "closing source connection");
                active.socket.close("server shutting down");
                active.adapter.close();
                self.fanout.clear_active();
                let _ = timeout(CLOSE_GRACE, active.socket.closed()).await;
                let _ = timeout(CLOSE_GRACE, active.adapter.closed()).await;
            }
        })
    }
}
