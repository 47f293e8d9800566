//! Sink endpoint
//!
//! Accepts any number of viewer peers. Each accepted socket gets its own
//! adapter registered with the fan-out; if a track is already active it is
//! published immediately, producing the initial offer down the new socket.

use crate::fanout::FanOut;
use crate::media::MediaFactory;
use crate::peer::{AdapterHandle, PeerAdapter, TrackCallback};
use crate::signaling::socket::{run_reader, SocketHandle};
use crate::signaling::Endpoint;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Longest wait for a closing peer to flush its close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

struct SinkConnection {
    socket: SocketHandle,
    adapter: AdapterHandle,
}

/// Multi-connection endpoint for viewer peers
pub struct SinkEndpoint {
    factory: Arc<MediaFactory>,
    fanout: FanOut,
    connections: Mutex<HashMap<Uuid, SinkConnection>>,
}

impl SinkEndpoint {
    pub fn new(factory: Arc<MediaFactory>, fanout: FanOut) -> Arc<Self> {
        Arc::new(Self {
            factory,
            fanout,
            connections: Mutex::new(HashMap::new()),
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

        // Sinks are send-only from the relay's perspective
        let on_track: TrackCallback = Box::new(|_peer, _remote| {
            debug!("ignoring inbound track on a sink peer");
        });

        let adapter = match PeerAdapter::spawn(&self.factory, socket.clone(), "sink", on_track).await
        {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(%peer_addr, error = %e, "failed to create sink peer");
                socket.close("internal error");
                return;
            }
        };

        let id = adapter.id();
        self.connections.lock().await.insert(
            id,
            SinkConnection {
                socket,
                adapter: adapter.clone(),
            },
        );
        self.fanout.attach(id, adapter.clone());

        info!(%peer_addr, sink = %id, "sink connected");
        run_reader(read, adapter.clone()).await;

        self.fanout.detach(id);
        self.connections.lock().await.remove(&id);
        adapter.close();
        info!(sink = %id, "sink disconnected");
    }
}

impl Endpoint for SinkEndpoint {
    fn handle(
        self: Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self.serve(stream, peer_addr))
    }

    fn close_all(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let drained: Vec<(Uuid, SinkConnection)> =
                self.connections.lock().await.drain().collect();
            info!(sinks = drained.len(), "closing sink connections");

            for (id, connection) in &drained {
                connection.socket.close("server shutting down");
                connection.adapter.close();
                self.fanout.detach(*id);
            }

            for (_, connection) in drained {
                let _ = timeout(CLOSE_GRACE, connection.socket.closed()).await;
                let _ = timeout(CLOSE_GRACE, connection.adapter.closed()).await;
            }
        })
    }
}
