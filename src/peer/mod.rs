//! Peer connection adapters
//!
//! Each signaling socket owns one adapter, which owns one peer connection
//! and drives it through impolite perfect negotiation.

pub mod adapter;

pub use adapter::{offer_collision, AdapterHandle, PeerAdapter, TrackCallback};
