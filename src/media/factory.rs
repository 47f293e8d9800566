//! Shared WebRTC engine factory
//!
//! Cross-peer track relaying only works when every peer connection in the
//! process comes from the same engine instance, so the factory is created
//! once by the supervisor and injected into both endpoints.

use crate::config::TurnServerConfig;
use crate::{Error, Result};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

/// Process-wide WebRTC engine handle
pub struct MediaFactory {
    api: API,
    config: RTCConfiguration,
}

impl MediaFactory {
    /// Build the engine with default codecs and interceptors
    pub fn new(turn: &TurnServerConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnection(format!("failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::PeerConnection(format!("failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        Ok(Self { api, config })
    }

    /// Create a peer connection configured with the relay's TURN server
    pub async fn new_peer(&self) -> Result<Arc<RTCPeerConnection>> {
        let peer = self
            .api
            .new_peer_connection(self.config.clone())
            .await
            .map_err(|e| Error::PeerConnection(format!("failed to create peer connection: {}", e)))?;

        Ok(Arc::new(peer))
    }
}
