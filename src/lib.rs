//! WebRTC screen-share relay
//!
//! A single long-running process that accepts one screen-capture "source"
//! peer and any number of "sink" peers over WebSocket signaling, and mirrors
//! the source's live video track to every sink through an independent peer
//! connection per sink. Browsers reach the relay through a TURN server; no
//! two browser clients ever talk to each other directly.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  source browser            sink browsers                 │
//! │     ↓ ws :9002                ↓ ws :9003                 │
//! │  SourceEndpoint            SinkEndpoint                  │
//! │     └─ PeerAdapter            └─ PeerAdapter (per sink)  │
//! │         │ on_track                 ↑ publish             │
//! │         ▼                          │                     │
//! │     SourceTrack ──────────► FanOut ┘                     │
//! │     (RTP broadcast)        (active track + registry)     │
//! │                                                          │
//! │  MediaFactory (one engine instance for every peer)       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every adapter runs impolite "perfect negotiation": colliding remote
//! offers are dropped, never rolled back; the browser side is the polite
//! one.

#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod fanout;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod supervisor;

pub use config::{RelayConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use supervisor::Relay;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
