//! Integration tests for the relay
//!
//! These tests drive the signaling and fan-out machinery in-process: real
//! peer connections and real sockets, but no ICE connectivity or media flow
//! is required for any assertion.

use futures::{SinkExt, StreamExt};
use mirror_relay::media::{MediaFactory, SourceTrack};
use mirror_relay::peer::{PeerAdapter, TrackCallback};
use mirror_relay::signaling::{SdpKind, SessionDescription, SignalMessage, SocketHandle};
use mirror_relay::{Relay, RelayConfig, TurnServerConfig};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};

fn test_factory() -> MediaFactory {
    MediaFactory::new(&TurnServerConfig::default()).expect("factory")
}

fn vp8_codec() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_string(),
        clock_rate: 90000,
        ..Default::default()
    }
}

fn noop_track_callback() -> TrackCallback {
    Box::new(|_peer, _remote| {})
}

/// Wait for the next outbound text frame and parse it
async fn next_message(rx: &mut mpsc::UnboundedReceiver<Message>) -> SignalMessage {
    let frame = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for outbound frame")
        .expect("outbound channel closed");

    match frame {
        Message::Text(text) => SignalMessage::from_json(&text).expect("outbound frame parses"),
        other => panic!("unexpected outbound frame: {:?}", other),
    }
}

/// Wait for the next outbound description, skipping trickled candidates
async fn next_description(rx: &mut mpsc::UnboundedReceiver<Message>) -> SessionDescription {
    loop {
        match next_message(rx).await {
            SignalMessage::Description(description) => return description,
            SignalMessage::Candidate(_) => continue,
        }
    }
}

/// Assert no description goes out for a while (candidates are fine)
async fn assert_no_description(rx: &mut mpsc::UnboundedReceiver<Message>, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, rx.recv()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(Message::Text(text))) => {
                if let Ok(SignalMessage::Description(d)) = SignalMessage::from_json(&text) {
                    panic!("unexpected outbound description: {:?}", d.kind);
                }
            }
            Ok(Some(_)) => continue,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn offer_survives_envelope_round_trip() {
    let factory = test_factory();
    let peer = factory.new_peer().await.expect("peer");
    peer.add_transceiver_from_kind(RTPCodecType::Video, None)
        .await
        .expect("transceiver");

    let offer = peer.create_offer(None).await.expect("offer");
    let message = SignalMessage::Description(SessionDescription {
        kind: SdpKind::Offer,
        sdp: offer.sdp.clone(),
    });

    let json = message.to_json().expect("serialize");
    let parsed = SignalMessage::from_json(&json).expect("parse");
    assert_eq!(message, parsed);

    peer.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread")]
async fn adapter_answers_a_remote_offer() {
    let factory = test_factory();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let adapter = PeerAdapter::spawn(
        &factory,
        SocketHandle::new(tx),
        "source",
        noop_track_callback(),
    )
    .await
    .expect("adapter");

    // The browser side: a capture peer offering one video track
    let browser = factory.new_peer().await.expect("browser peer");
    browser
        .add_transceiver_from_kind(RTPCodecType::Video, None)
        .await
        .expect("transceiver");
    let offer = browser.create_offer(None).await.expect("offer");
    browser
        .set_local_description(offer.clone())
        .await
        .expect("set local");

    adapter.inbound(SignalMessage::Description(SessionDescription {
        kind: SdpKind::Offer,
        sdp: offer.sdp,
    }));

    let answer = next_description(&mut outbound).await;
    assert_eq!(answer.kind, SdpKind::Answer);
    assert!(answer.sdp.contains("video"));

    // The produced answer is a valid remote description for the browser
    let remote = RTCSessionDescription::answer(answer.sdp).expect("parse answer");
    browser
        .set_remote_description(remote)
        .await
        .expect("apply answer");

    adapter.close();
    browser.close().await.expect("close browser");
}

#[tokio::test(flavor = "multi_thread")]
async fn publishing_a_track_produces_an_offer() {
    let factory = test_factory();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let adapter = PeerAdapter::spawn(
        &factory,
        SocketHandle::new(tx),
        "sink",
        noop_track_callback(),
    )
    .await
    .expect("adapter");

    adapter.publish(SourceTrack::new(vp8_codec()));

    let offer = next_description(&mut outbound).await;
    assert_eq!(offer.kind, SdpKind::Offer);
    assert!(offer.sdp.contains("video"));

    adapter.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn colliding_remote_offer_is_dropped() {
    let factory = test_factory();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let adapter = PeerAdapter::spawn(
        &factory,
        SocketHandle::new(tx),
        "sink",
        noop_track_callback(),
    )
    .await
    .expect("adapter");

    // Drive the adapter into have-local-offer by publishing a track
    adapter.publish(SourceTrack::new(vp8_codec()));
    let offer = next_description(&mut outbound).await;
    assert_eq!(offer.kind, SdpKind::Offer);

    // A remote offer arriving now is a glare collision; the impolite side
    // drops it and produces no answer
    let browser = factory.new_peer().await.expect("browser peer");
    browser
        .add_transceiver_from_kind(RTPCodecType::Video, None)
        .await
        .expect("transceiver");
    let remote_offer = browser.create_offer(None).await.expect("offer");

    adapter.inbound(SignalMessage::Description(SessionDescription {
        kind: SdpKind::Offer,
        sdp: remote_offer.sdp,
    }));

    assert_no_description(&mut outbound, Duration::from_millis(800)).await;

    adapter.close();
    browser.close().await.expect("close browser");
}

#[tokio::test(flavor = "multi_thread")]
async fn fanout_publishes_to_attached_and_late_sinks() {
    use mirror_relay::fanout::FanOut;

    let factory = test_factory();
    let fanout = FanOut::spawn();

    let mut sinks = Vec::new();
    for _ in 0..2 {
        let (tx, outbound) = mpsc::unbounded_channel();
        let adapter = PeerAdapter::spawn(
            &factory,
            SocketHandle::new(tx),
            "sink",
            noop_track_callback(),
        )
        .await
        .expect("adapter");
        fanout.attach(adapter.id(), adapter.clone());
        sinks.push((adapter, outbound));
    }

    fanout.set_active(SourceTrack::new(vp8_codec()));

    for (_, outbound) in &mut sinks {
        let offer = next_description(outbound).await;
        assert_eq!(offer.kind, SdpKind::Offer);
    }

    // A sink attaching after the track became active is published immediately
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let late = PeerAdapter::spawn(
        &factory,
        SocketHandle::new(tx),
        "sink",
        noop_track_callback(),
    )
    .await
    .expect("late adapter");
    fanout.attach(late.id(), late.clone());

    let offer = next_description(&mut outbound).await;
    assert_eq!(offer.kind, SdpKind::Offer);

    for (adapter, _) in &sinks {
        adapter.close();
    }
    late.close();
    fanout.shutdown();
}

fn test_config(source_port: u16, sink_port: u16) -> RelayConfig {
    RelayConfig {
        source_port,
        sink_port,
        log_file: None,
        ..RelayConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_source_is_closed_with_going_away() {
    let relay = Relay::start(test_config(19102, 19103)).await.expect("relay");

    let (mut first, _) = connect_async("ws://127.0.0.1:19102")
        .await
        .expect("first source connects");

    // Let the relay finish admitting the first source
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (mut second, _) = connect_async("ws://127.0.0.1:19102")
        .await
        .expect("second source handshake");

    let frame = timeout(Duration::from_secs(5), second.next())
        .await
        .expect("timed out waiting for rejection")
        .expect("stream ended without a close frame")
        .expect("read failed");

    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Away),
        other => panic!("expected a close frame, got {:?}", other),
    }

    // The first source is unaffected; its socket is still writable
    first
        .send(Message::Text(
            r#"{"candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 9 typ host","sdpMid":"0","sdpMLineIndex":0}}"#.to_string(),
        ))
        .await
        .expect("first source still writable");

    relay.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn binary_frames_are_dropped_and_connection_survives() {
    let relay = Relay::start(test_config(19202, 19203)).await.expect("relay");

    let (mut sink, _) = connect_async("ws://127.0.0.1:19203")
        .await
        .expect("sink connects");

    sink.send(Message::Binary(vec![1, 2, 3]))
        .await
        .expect("send binary");

    // The connection stays open: nothing arrives and no close is issued
    let quiet = timeout(Duration::from_millis(700), sink.next()).await;
    assert!(quiet.is_err(), "connection closed after a binary frame");

    // Shutdown closes the surviving sink with "going away"
    let relay_shutdown = tokio::spawn(relay.shutdown());
    let frame = timeout(Duration::from_secs(5), sink.next())
        .await
        .expect("timed out waiting for shutdown close")
        .expect("stream ended without a close frame")
        .expect("read failed");

    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Away),
        other => panic!("expected a close frame, got {:?}", other),
    }

    relay_shutdown.await.expect("shutdown task");
}

#[tokio::test(flavor = "multi_thread")]
async fn late_viewer_sees_no_offer_before_a_source_arrives() {
    let relay = Relay::start(test_config(19302, 19303)).await.expect("relay");

    let (mut sink, _) = connect_async("ws://127.0.0.1:19303")
        .await
        .expect("sink connects");

    // No active track, so the relay must stay silent
    let quiet = timeout(Duration::from_millis(700), sink.next()).await;
    assert!(quiet.is_err(), "relay produced traffic without a source");

    relay.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn retired_source_track_closes_its_subscriptions() {
    let track = SourceTrack::new(vp8_codec());
    let mut packets = track.subscribe();

    track.retire();
    drop(track);

    match packets.recv().await {
        Err(tokio::sync::broadcast::error::RecvError::Closed) => {}
        other => panic!("expected a closed stream, got {:?}", other),
    }
}
