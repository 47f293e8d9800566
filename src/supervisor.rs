//! Process supervisor
//!
//! Builds the shared media factory, the fan-out, and both endpoints, then
//! tears everything down in order: sinks first, then the source, then the
//! fan-out so the source track is released only after every sink peer is
//! closed.

use crate::config::RelayConfig;
use crate::endpoint::{SinkEndpoint, SourceEndpoint};
use crate::fanout::FanOut;
use crate::media::MediaFactory;
use crate::signaling::{ListenerHandle, SignalingListener};
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// The running relay process
pub struct Relay {
    fanout: FanOut,
    source_listener: ListenerHandle,
    sink_listener: ListenerHandle,
}

impl Relay {
    /// Start both endpoints; fails fast on factory creation or port bind
    pub async fn start(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let factory = Arc::new(MediaFactory::new(&config.turn)?);
        let fanout = FanOut::spawn();

        let sinks = SinkEndpoint::new(Arc::clone(&factory), fanout.clone());
        let sink_listener = SignalingListener::start("sink", config.sink_port, sinks).await?;

        let sources = SourceEndpoint::new(factory, fanout.clone());
        let source_listener =
            SignalingListener::start("source", config.source_port, sources).await?;

        info!(
            source_port = config.source_port,
            sink_port = config.sink_port,
            "relay started"
        );

        Ok(Self {
            fanout,
            source_listener,
            sink_listener,
        })
    }

    /// Ordered shutdown: sink peers, source peer, then the relayed track
    pub async fn shutdown(self) {
        info!("shutting down relay");
        self.sink_listener.shutdown().await;
        self.source_listener.shutdown().await;
        self.fanout.shutdown();
        info!("relay stopped");
    }
}
