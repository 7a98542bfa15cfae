//! Peer transport integration tests
//!
//! Drives loopback connections only through the `TransportFactory` and
//! `PeerTransport` trait objects, the way the session layer sees them.

use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use streamrtc_core::{
    IceCandidateInit, IceConfig, IceServer, LoopbackFactory, LoopbackOptions, OfferOptions,
    PeerConnectionState, PeerEvent, PeerEvents, PeerTransport, TrackInfo, TrackKind, TransportFactory,
};

fn drain(events: &mut PeerEvents) -> Vec<PeerEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn candidates(events: &[PeerEvent]) -> Vec<IceCandidateInit> {
    events
        .iter()
        .filter_map(|e| match e {
            PeerEvent::IceCandidate(Some(c)) => Some(c.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_factory_as_trait_object() {
    let loopback = Arc::new(LoopbackFactory::new());
    let factory: Arc<dyn TransportFactory> = loopback.clone();

    let config = IceConfig {
        ice_servers: vec![IceServer::stun("stun:stun.example.org:3478")],
        ice_candidate_pool_size: 4,
    };
    let (pc, _events) = assert_ok!(factory.create(&config).await);
    assert_eq!(pc.connection_state(), PeerConnectionState::New);

    let created = loopback.latest().unwrap();
    assert_eq!(created.ice_config().ice_servers.len(), 1);
    assert_eq!(created.ice_config().ice_candidate_pool_size, 4);
}

#[tokio::test]
async fn test_gathering_follows_options() {
    let factory = LoopbackFactory::with_options(LoopbackOptions {
        candidates_per_gather: 4,
        emit_end_of_candidates: false,
    });
    let (pc, mut events) = assert_ok!(factory.create(&IceConfig::default()).await);

    let offer = assert_ok!(pc.create_offer(OfferOptions::default()).await);
    assert_ok!(pc.set_local_description(offer.clone()).await);
    // a second local description does not gather again
    assert_ok!(pc.set_local_description(offer).await);

    let seen = drain(&mut events);
    assert_eq!(candidates(&seen).len(), 4);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, PeerEvent::IceCandidate(None))));
    assert!(candidates(&seen)
        .iter()
        .all(|c| c.candidate.starts_with("candidate:")));
}

#[tokio::test]
async fn test_both_sides_reach_connected() {
    let factory = LoopbackFactory::new();
    let (host, mut host_events) = assert_ok!(factory.create(&IceConfig::default()).await);
    let (viewer, mut viewer_events) = assert_ok!(factory.create(&IceConfig::default()).await);

    assert_ok!(
        host.add_track(TrackInfo {
            id: "cam-1".to_string(),
            kind: TrackKind::Video,
            stream_id: "host-stream".to_string(),
        })
        .await
    );
    let offer = assert_ok!(host.create_offer(OfferOptions::default()).await);
    assert_ok!(host.set_local_description(offer.clone()).await);
    assert_ok!(viewer.set_remote_description(offer).await);

    let answer = assert_ok!(viewer.create_answer().await);
    assert_ok!(viewer.set_local_description(answer.clone()).await);
    assert_ok!(host.set_remote_description(answer.clone()).await);
    // stable state rejects a second answer
    assert_err!(host.set_remote_description(answer).await);

    for candidate in candidates(&drain(&mut host_events)) {
        assert_ok!(viewer.add_ice_candidate(candidate).await);
    }
    let viewer_seen = drain(&mut viewer_events);
    for candidate in candidates(&viewer_seen) {
        assert_ok!(host.add_ice_candidate(candidate).await);
    }

    assert_eq!(host.connection_state(), PeerConnectionState::Connected);
    assert_eq!(viewer.connection_state(), PeerConnectionState::Connected);
    assert!(viewer_seen.iter().any(|e| matches!(e, PeerEvent::Track(_))));
    assert!(viewer_seen.contains(&PeerEvent::ConnectionStateChanged(
        PeerConnectionState::Connecting
    )));

    assert_ok!(host.close().await);
    assert_ok!(viewer.close().await);
    assert_eq!(factory.open_count(), 0);
}
