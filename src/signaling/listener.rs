//! Signaling listener
//!
//! Each listener runs its accept loop on a dedicated thread with its own
//! tokio runtime so the loop is always polled regardless of what the rest of
//! the process is doing. Accepted connections are handed to the endpoint that
//! owns the listener; on shutdown the endpoint closes its live sockets before
//! the thread exits.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::thread;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tracing::{error, info, warn};

/// A connection acceptor bound to one listener
pub trait Endpoint: Send + Sync + 'static {
    /// Handle one accepted TCP connection until it closes
    fn handle(
        self: Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>>;

    /// Close every live connection with a "going away" frame
    fn close_all(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// WebSocket signaling listener for one endpoint
pub struct SignalingListener;

impl SignalingListener {
    /// Bind the listener and start its accept loop
    ///
    /// Spawns a dedicated thread with its own tokio runtime. Returns once the
    /// port is bound; a bind failure is reported as an error so the process
    /// can exit at startup.
    pub async fn start<E: Endpoint>(
        name: &'static str,
        port: u16,
        endpoint: Arc<E>,
    ) -> crate::Result<ListenerHandle> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let (startup_tx, startup_rx) = oneshot::channel::<std::io::Result<()>>();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown = shutdown_tx.clone();

        let thread = thread::Builder::new()
            .name(format!("{}-listener", name))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = startup_tx.send(Err(e));
                        return;
                    }
                };

                rt.block_on(async move {
                    let listener = match TcpListener::bind(&addr).await {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!(name, %addr, error = %e, "failed to bind signaling listener");
                            let _ = startup_tx.send(Err(e));
                            return;
                        }
                    };

                    info!(name, %addr, "signaling listener ready");
                    let _ = startup_tx.send(Ok(()));

                    let mut shutdown_rx = shutdown.subscribe();
                    loop {
                        tokio::select! {
                            accepted = listener.accept() => match accepted {
                                Ok((stream, peer_addr)) => {
                                    info!(name, %peer_addr, "accepted signaling connection");
                                    tokio::spawn(Arc::clone(&endpoint).handle(stream, peer_addr));
                                }
                                Err(e) => {
                                    warn!(name, error = %e, "failed to accept signaling connection");
                                }
                            },
                            _ = shutdown_rx.recv() => break,
                        }
                    }

                    endpoint.close_all().await;
                    info!(name, "signaling listener stopped");
                });
            })
            .map_err(crate::Error::Io)?;

        match startup_rx.await {
            Ok(Ok(())) => Ok(ListenerHandle {
                thread: Some(thread),
                shutdown_tx,
            }),
            Ok(Err(e)) => Err(crate::Error::Io(e)),
            Err(_) => Err(crate::Error::Signaling(
                "listener startup channel closed unexpectedly".to_string(),
            )),
        }
    }
}

/// Handle for stopping a running listener
pub struct ListenerHandle {
    thread: Option<thread::JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ListenerHandle {
    /// Stop accepting, close live connections, and join the listener thread
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
