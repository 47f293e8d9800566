//! The relayed source track
//!
//! The engine relays media at the RTP level: packets read off the source
//! peer's remote track are fanned out through a broadcast channel, and each
//! sink republishes them through its own local track. A periodic picture
//! loss indication keeps late-joining sinks supplied with keyframes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_remote::TrackRemote;

/// Stream label every sink publishes the mirrored track under
pub const MIRRORED_STREAM_LABEL: &str = "mirrored_stream";

/// Buffered packets per sink before a slow sink starts skipping
const PACKET_BUFFER: usize = 512;

/// Interval between keyframe requests towards the source
const KEYFRAME_INTERVAL: Duration = Duration::from_secs(3);

/// One live track captured from the source peer
pub struct SourceTrack {
    codec: RTCRtpCodecCapability,
    packets: broadcast::Sender<Packet>,
    stop: CancellationToken,
}

impl SourceTrack {
    /// Build a track carrier without a producer behind it
    pub fn new(codec: RTCRtpCodecCapability) -> Arc<Self> {
        let (packets, _) = broadcast::channel(PACKET_BUFFER);
        Arc::new(Self {
            codec,
            packets,
            stop: CancellationToken::new(),
        })
    }

    /// Start relaying a remote track that appeared on the source peer
    ///
    /// Spawns the RTP pump and the keyframe request task; both stop when the
    /// track is retired or the source peer goes away.
    pub fn start(peer: Arc<RTCPeerConnection>, remote: Arc<TrackRemote>) -> Arc<Self> {
        let track = Self::new(remote.codec().capability.clone());

        let ssrc = remote.ssrc();

        let packets = track.packets.clone();
        let stop = track.stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    read = remote.read_rtp() => match read {
                        Ok((packet, _)) => {
                            // No receivers is fine; sinks may not be attached yet
                            let _ = packets.send(packet);
                        }
                        Err(e) => {
                            debug!(error = %e, "source RTP stream ended");
                            break;
                        }
                    }
                }
            }
        });

        let stop = track.stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEYFRAME_INTERVAL);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let pli = PictureLossIndication {
                            sender_ssrc: 0,
                            media_ssrc: ssrc,
                        };
                        if let Err(e) = peer.write_rtcp(&[Box::new(pli)]).await {
                            debug!(error = %e, "keyframe request failed");
                            break;
                        }
                    }
                }
            }
        });

        track
    }

    /// Codec the source negotiated; sinks republish with the same capability
    pub fn codec(&self) -> RTCRtpCodecCapability {
        self.codec.clone()
    }

    /// Subscribe a sink to the packet stream
    pub fn subscribe(&self) -> broadcast::Receiver<Packet> {
        self.packets.subscribe()
    }

    /// Stop the pump and keyframe tasks
    pub fn retire(&self) {
        self.stop.cancel();
    }
}

impl Drop for SourceTrack {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
