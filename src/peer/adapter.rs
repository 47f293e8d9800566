//! Peer adapter and negotiation state machine
//!
//! One adapter per signaling socket, paired 1:1 with one peer connection.
//! The relay end of every negotiation is impolite: a remote offer that
//! collides with one we are producing is dropped, never rolled back.
//!
//! All adapter state lives inside a single actor task fed by a tagged event
//! channel. Engine callbacks only post events, so `making_offer` and
//! `ignore_offer` are read and written from exactly one place; a callback
//! that fires after the adapter is gone lands in a closed channel and
//! becomes a no-op.

use crate::media::{MediaFactory, SourceTrack, MIRRORED_STREAM_LABEL};
use crate::signaling::protocol::{IceCandidate, SdpKind, SessionDescription, SignalMessage};
use crate::signaling::SocketHandle;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

/// Callback invoked when a remote track appears on the adapter's peer
pub type TrackCallback = Box<dyn FnMut(Arc<RTCPeerConnection>, Arc<TrackRemote>) + Send>;

/// Tagged events consumed by the adapter actor
enum AdapterEvent {
    NegotiationNeeded,
    LocalCandidate(RTCIceCandidate),
    Inbound(SignalMessage),
    TrackAdded(Arc<TrackRemote>),
    Publish(Arc<SourceTrack>),
    Unpublish,
    Close,
}

/// Cloneable handle addressing one adapter actor
#[derive(Clone)]
pub struct AdapterHandle {
    id: Uuid,
    events: mpsc::UnboundedSender<AdapterEvent>,
    done: CancellationToken,
}

impl AdapterHandle {
    /// Adapter identifier, stable for the life of the connection
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolves once the actor has stopped and the peer connection is closed
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }

    /// Deliver a parsed signaling message from the socket
    pub fn inbound(&self, message: SignalMessage) {
        let _ = self.events.send(AdapterEvent::Inbound(message));
    }

    /// Republish the given track through this peer (sinks only)
    pub fn publish(&self, track: Arc<SourceTrack>) {
        let _ = self.events.send(AdapterEvent::Publish(track));
    }

    /// Remove the published track, negotiating down to a stopped sender
    pub fn unpublish(&self) {
        let _ = self.events.send(AdapterEvent::Unpublish);
    }

    /// Stop the actor and close the peer connection
    pub fn close(&self) {
        let _ = self.events.send(AdapterEvent::Close);
    }
}

/// The track currently republished through a sink peer
struct Publication {
    sender: Arc<RTCRtpSender>,
    stop: CancellationToken,
}

/// Peer adapter actor state
pub struct PeerAdapter {
    id: Uuid,
    label: &'static str,
    peer: Arc<RTCPeerConnection>,
    socket: SocketHandle,
    on_track: TrackCallback,
    making_offer: bool,
    ignore_offer: bool,
    published: Option<Publication>,
    done: CancellationToken,
}

impl PeerAdapter {
    /// Create the peer connection, wire its callbacks, and start the actor
    pub async fn spawn(
        factory: &MediaFactory,
        socket: SocketHandle,
        label: &'static str,
        on_track: TrackCallback,
    ) -> Result<AdapterHandle> {
        let id = Uuid::new_v4();
        let peer = factory.new_peer().await?;
        let (events, events_rx) = mpsc::unbounded_channel();

        info!(peer = %id, label, "created peer connection");

        let tx = events.clone();
        peer.on_negotiation_needed(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(AdapterEvent::NegotiationNeeded);
            })
        }));

        let tx = events.clone();
        peer.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    let _ = tx.send(AdapterEvent::LocalCandidate(candidate));
                }
            })
        }));

        let tx = events.clone();
        peer.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(AdapterEvent::TrackAdded(track));
            })
        }));

        peer.on_data_channel(Box::new(move |channel| {
            Box::pin(async move {
                info!(channel = %channel.label(), "ignoring inbound data channel");
            })
        }));

        peer.on_signaling_state_change(Box::new(move |state| {
            Box::pin(async move {
                debug!(peer = %id, ?state, "signaling state changed");
            })
        }));

        peer.on_ice_gathering_state_change(Box::new(move |state| {
            Box::pin(async move {
                debug!(peer = %id, ?state, "ICE gathering state changed");
            })
        }));

        peer.on_ice_connection_state_change(Box::new(move |state| {
            Box::pin(async move {
                debug!(peer = %id, ?state, "ICE connection state changed");
            })
        }));

        // Closure is driven only by the socket or the supervisor, so state
        // changes are observed but never acted on here.
        peer.on_peer_connection_state_change(Box::new(move |state| {
            Box::pin(async move {
                info!(peer = %id, ?state, "connection state changed");
            })
        }));

        let done = CancellationToken::new();
        let adapter = Self {
            id,
            label,
            peer,
            socket,
            on_track,
            making_offer: false,
            ignore_offer: false,
            published: None,
            done: done.clone(),
        };
        tokio::spawn(adapter.run(events_rx));

        Ok(AdapterHandle { id, events, done })
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<AdapterEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                AdapterEvent::NegotiationNeeded => self.negotiate().await,
                AdapterEvent::Inbound(SignalMessage::Description(description)) => {
                    self.apply_remote_description(description).await;
                }
                AdapterEvent::Inbound(SignalMessage::Candidate(candidate)) => {
                    self.add_remote_candidate(candidate).await;
                }
                AdapterEvent::LocalCandidate(candidate) => self.send_local_candidate(candidate),
                AdapterEvent::TrackAdded(track) => {
                    info!(peer = %self.id, label = self.label, "remote track added");
                    (self.on_track)(Arc::clone(&self.peer), track);
                }
                AdapterEvent::Publish(track) => self.publish(track).await,
                AdapterEvent::Unpublish => self.unpublish().await,
                AdapterEvent::Close => break,
            }
        }

        if let Some(publication) = self.published.take() {
            publication.stop.cancel();
        }
        if let Err(e) = self.peer.close().await {
            debug!(peer = %self.id, error = %e, "peer connection close failed");
        }
        info!(peer = %self.id, label = self.label, "peer adapter stopped");
        self.done.cancel();
    }

    /// The engine wants a fresh offer, typically after a track change
    async fn negotiate(&mut self) {
        self.making_offer = true;
        if let Err(e) = self.send_local_description(true).await {
            warn!(peer = %self.id, error = %e, "offer negotiation failed");
        }
        self.making_offer = false;
    }

    /// Create, install, and send the local description
    async fn send_local_description(&mut self, offer: bool) -> Result<()> {
        let description = if offer {
            self.peer.create_offer(None).await
        } else {
            self.peer.create_answer(None).await
        }
        .map_err(|e| Error::Sdp(format!("failed to create local description: {}", e)))?;

        self.peer
            .set_local_description(description)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set local description: {}", e)))?;

        let local = self.peer.local_description().await.ok_or_else(|| {
            Error::Sdp("no local description after installing it".to_string())
        })?;

        let message = SignalMessage::Description(SessionDescription {
            kind: sdp_kind(local.sdp_type)?,
            sdp: local.sdp,
        });
        self.socket.send_text(message.to_json()?);

        debug!(peer = %self.id, offer, "sent local description");
        Ok(())
    }

    async fn apply_remote_description(&mut self, description: SessionDescription) {
        let collision = offer_collision(
            description.kind,
            self.making_offer,
            self.peer.signaling_state(),
        );

        self.ignore_offer = collision;
        if collision {
            debug!(peer = %self.id, "ignoring colliding remote offer");
            return;
        }

        let is_offer = description.kind == SdpKind::Offer;
        let remote = match rtc_description(description) {
            Ok(remote) => remote,
            Err(e) => {
                warn!(peer = %self.id, error = %e, "dropping unusable remote description");
                return;
            }
        };

        if let Err(e) = self.peer.set_remote_description(remote).await {
            warn!(peer = %self.id, error = %e, "failed to set remote description");
            return;
        }

        if is_offer {
            if let Err(e) = self.send_local_description(false).await {
                warn!(peer = %self.id, error = %e, "failed to answer remote offer");
            }
        }
    }

    async fn add_remote_candidate(&mut self, candidate: IceCandidate) {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: Some(candidate.sdp_mid),
            sdp_mline_index: Some(candidate.sdp_m_line_index),
            username_fragment: None,
        };

        if let Err(e) = self.peer.add_ice_candidate(init).await {
            if self.ignore_offer {
                debug!(peer = %self.id, "discarding candidate for an ignored offer");
            } else {
                warn!(peer = %self.id, error = %e, "failed to add remote ICE candidate");
            }
        }
    }

    fn send_local_candidate(&self, candidate: RTCIceCandidate) {
        let init = match candidate.to_json() {
            Ok(init) => init,
            Err(e) => {
                warn!(peer = %self.id, error = %e, "failed to serialize local ICE candidate");
                return;
            }
        };

        let message = SignalMessage::Candidate(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid.unwrap_or_default(),
            sdp_m_line_index: init.sdp_mline_index.unwrap_or_default(),
        });

        match message.to_json() {
            Ok(json) => self.socket.send_text(json),
            Err(e) => warn!(peer = %self.id, error = %e, "failed to serialize candidate message"),
        }
    }

    /// Swap the relayed track into this sink peer
    ///
    /// Removing the previous sender must succeed before the old stream is
    /// abandoned; on failure this sink keeps what it has. Adding the track
    /// makes the engine fire negotiation-needed, which produces the offer.
    async fn publish(&mut self, track: Arc<SourceTrack>) {
        if let Some(current) = self.published.take() {
            if let Err(e) = self.peer.remove_track(&current.sender).await {
                warn!(peer = %self.id, error = %e, "failed to remove previous sender, keeping existing stream");
                self.published = Some(current);
                return;
            }
            current.stop.cancel();
        }

        let local = Arc::new(TrackLocalStaticRTP::new(
            track.codec(),
            "video".to_string(),
            MIRRORED_STREAM_LABEL.to_string(),
        ));

        let sender = match self
            .peer
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                warn!(peer = %self.id, error = %e, "failed to add relay track");
                return;
            }
        };

        let stop = CancellationToken::new();
        spawn_forwarder(track.subscribe(), local, stop.clone(), self.id);
        spawn_rtcp_drain(Arc::clone(&sender), stop.clone());

        self.published = Some(Publication { sender, stop });
        info!(peer = %self.id, "published mirrored track");
    }

    async fn unpublish(&mut self) {
        let Some(current) = self.published.take() else {
            return;
        };

        current.stop.cancel();
        if let Err(e) = self.peer.remove_track(&current.sender).await {
            warn!(peer = %self.id, error = %e, "failed to remove published sender");
        }
        info!(peer = %self.id, "cleared mirrored track");
    }
}

/// The impolite collision predicate
///
/// An incoming offer collides when this adapter is mid-offer itself or its
/// connection is not settled; the impolite side drops the remote offer.
pub fn offer_collision(kind: SdpKind, making_offer: bool, state: RTCSignalingState) -> bool {
    kind == SdpKind::Offer && (making_offer || state != RTCSignalingState::Stable)
}

fn sdp_kind(sdp_type: RTCSdpType) -> Result<SdpKind> {
    match sdp_type {
        RTCSdpType::Offer => Ok(SdpKind::Offer),
        RTCSdpType::Answer => Ok(SdpKind::Answer),
        RTCSdpType::Pranswer => Ok(SdpKind::Pranswer),
        RTCSdpType::Rollback => Ok(SdpKind::Rollback),
        RTCSdpType::Unspecified => Err(Error::Sdp(
            "local description has no usable type".to_string(),
        )),
    }
}

fn rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let built = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        // The impolite side never rolls back
        SdpKind::Rollback => {
            return Err(Error::Sdp("rollback descriptions are not accepted".to_string()))
        }
    };

    built.map_err(|e| Error::Sdp(format!("failed to parse remote description: {}", e)))
}

fn spawn_forwarder(
    mut packets: broadcast::Receiver<Packet>,
    track: Arc<TrackLocalStaticRTP>,
    stop: CancellationToken,
    peer: Uuid,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = packets.recv() => match received {
                    Ok(packet) => {
                        if let Err(e) = track.write_rtp(&packet).await {
                            debug!(%peer, error = %e, "relay write failed");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%peer, skipped, "sink lagged behind the source");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        debug!(%peer, "relay forwarder stopped");
    });
}

/// RTCP arriving on a sender has to be drained for the interceptors to run
fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>, stop: CancellationToken) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                read = sender.read(&mut buf) => {
                    if read.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_collision_while_making_offer() {
        assert!(offer_collision(
            SdpKind::Offer,
            true,
            RTCSignalingState::Stable
        ));
    }

    #[test]
    fn test_offer_collision_while_unsettled() {
        assert!(offer_collision(
            SdpKind::Offer,
            false,
            RTCSignalingState::HaveLocalOffer
        ));
    }

    #[test]
    fn test_no_collision_when_stable_and_idle() {
        assert!(!offer_collision(
            SdpKind::Offer,
            false,
            RTCSignalingState::Stable
        ));
    }

    #[test]
    fn test_answers_never_collide() {
        assert!(!offer_collision(
            SdpKind::Answer,
            true,
            RTCSignalingState::HaveLocalOffer
        ));
    }

    #[test]
    fn test_rollback_description_is_rejected() {
        let result = rtc_description(SessionDescription {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        });
        assert!(result.is_err());
    }
}
