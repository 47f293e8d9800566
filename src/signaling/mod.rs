//! WebSocket signaling transport
//!
//! Two listeners (source and sink) carry the JSON envelope protocol over
//! text frames; each accepted socket is bound 1:1 to a peer adapter.

pub mod listener;
pub mod protocol;
pub mod socket;

pub use listener::{Endpoint, ListenerHandle, SignalingListener};
pub use protocol::{IceCandidate, SdpKind, SessionDescription, SignalMessage};
pub use socket::SocketHandle;
