//! In-process peer transport
//!
//! `LoopbackTransport` negotiates with synthetic SDP and host candidates. It
//! enforces the ordering rules a real peer connection does (no answer without
//! an offer, no remote candidates before a remote description, malformed
//! candidates rejected) and reports `Connecting`/`Connected` as the
//! negotiation completes. Connection-state changes can also be injected to
//! drive failure handling.

use super::{
    IceCandidateInit, IceConfig, OfferOptions, PeerConnectionState, PeerEvent, PeerEvents,
    PeerTransport, RemoteStream, SdpType, SessionDescription, TrackInfo, TrackKind,
    TransportFactory,
};
use crate::error::StreamRtcError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Behaviour knobs for loopback connections
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Host candidates emitted after the local description is applied
    pub candidates_per_gather: usize,
    /// Emit the end-of-candidates marker after gathering
    pub emit_end_of_candidates: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            candidates_per_gather: 2,
            emit_end_of_candidates: true,
        }
    }
}

#[derive(Debug)]
struct LoopbackState {
    connection: PeerConnectionState,
    local_tracks: Vec<TrackInfo>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidateInit>,
    gathered: bool,
    closed: bool,
}

impl Default for LoopbackState {
    fn default() -> Self {
        Self {
            connection: PeerConnectionState::New,
            local_tracks: Vec::new(),
            local: None,
            remote: None,
            remote_candidates: Vec::new(),
            gathered: false,
            closed: false,
        }
    }
}

/// Synthetic peer connection
#[derive(Debug)]
pub struct LoopbackTransport {
    id: String,
    options: LoopbackOptions,
    config: IceConfig,
    events: mpsc::UnboundedSender<PeerEvent>,
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    fn new(options: LoopbackOptions, config: IceConfig) -> (Arc<Self>, PeerEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            options,
            config,
            events,
            state: Mutex::new(LoopbackState::default()),
        });
        (transport, rx)
    }

    /// Connection id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Relay/reflection configuration the connection was built with
    pub fn ice_config(&self) -> &IceConfig {
        &self.config
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Local tracks currently attached
    pub fn local_tracks(&self) -> Vec<TrackInfo> {
        self.state.lock().local_tracks.clone()
    }

    /// Applied local description
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    /// Applied remote description
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// Remote candidates accepted so far
    pub fn remote_candidates(&self) -> Vec<IceCandidateInit> {
        self.state.lock().remote_candidates.clone()
    }

    /// Inject an event as if the underlying transport produced it
    pub fn emit(&self, event: PeerEvent) {
        if let PeerEvent::ConnectionStateChanged(next) = &event {
            self.state.lock().connection = *next;
        }
        let _ = self.events.send(event);
    }

    fn transition(&self, state: &mut LoopbackState, next: PeerConnectionState) {
        if state.connection != next {
            state.connection = next;
            let _ = self.events.send(PeerEvent::ConnectionStateChanged(next));
        }
    }

    fn ensure_open(state: &LoopbackState) -> Result<(), StreamRtcError> {
        if state.closed {
            return Err(StreamRtcError::Transport {
                reason: "connection is closed".to_string(),
            });
        }
        Ok(())
    }

    fn gather(&self) {
        let mut rng = rand::thread_rng();
        for foundation in 0..self.options.candidates_per_gather {
            let candidate = IceCandidateInit {
                candidate: format!(
                    "candidate:{} 1 udp {} 192.168.1.{} {} typ host",
                    foundation + 1,
                    2_122_260_223u32 - foundation as u32,
                    rng.gen_range(2..254),
                    rng.gen_range(49152..65535)
                ),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            };
            let _ = self.events.send(PeerEvent::IceCandidate(Some(candidate)));
        }
        if self.options.emit_end_of_candidates {
            let _ = self.events.send(PeerEvent::IceCandidate(None));
        }
    }

    fn render_sdp(&self, media: &[(TrackKind, Option<&TrackInfo>, &str)]) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.id
        );
        for (mid, (kind, track, direction)) in media.iter().enumerate() {
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:{}\r\n", kind, mid));
            if let Some(track) = track {
                sdp.push_str(&format!("a=msid:{} {}\r\n", track.stream_id, track.id));
            }
            sdp.push_str(&format!("a={}\r\n", direction));
        }
        sdp
    }
}

/// m-line kinds in order of appearance
fn media_kinds(sdp: &str) -> Vec<TrackKind> {
    sdp.lines()
        .filter_map(|line| {
            if line.starts_with("m=audio") {
                Some(TrackKind::Audio)
            } else if line.starts_with("m=video") {
                Some(TrackKind::Video)
            } else {
                None
            }
        })
        .collect()
}

/// Remote stream announced through `a=msid` lines, if any
fn announced_stream(sdp: &str) -> Option<RemoteStream> {
    let mut current = None;
    let mut stream_id = None;
    let mut tracks = Vec::new();

    for line in sdp.lines() {
        if line.starts_with("m=audio") {
            current = Some(TrackKind::Audio);
        } else if line.starts_with("m=video") {
            current = Some(TrackKind::Video);
        } else if let Some(msid) = line.strip_prefix("a=msid:") {
            let mut parts = msid.split_whitespace();
            if let (Some(kind), Some(stream), Some(track)) = (current, parts.next(), parts.next()) {
                stream_id.get_or_insert_with(|| stream.to_string());
                tracks.push(TrackInfo {
                    id: track.to_string(),
                    kind,
                    stream_id: stream.to_string(),
                });
            }
        }
    }

    stream_id.map(|id| RemoteStream { id, tracks })
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn add_track(&self, track: TrackInfo) -> Result<(), StreamRtcError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        debug!(connection = %self.id, track = %track.id, kind = %track.kind, "track added");
        state.local_tracks.push(track);
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: TrackInfo) -> Result<(), StreamRtcError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        match state.local_tracks.iter_mut().find(|t| t.kind == kind) {
            Some(slot) => {
                *slot = track;
                Ok(())
            }
            None => Err(StreamRtcError::Negotiation {
                reason: format!("no {} sender to replace", kind),
            }),
        }
    }

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, StreamRtcError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;

        let mut media: Vec<(TrackKind, Option<&TrackInfo>, &str)> = Vec::new();
        for kind in [TrackKind::Audio, TrackKind::Video] {
            let wanted = match kind {
                TrackKind::Audio => options.offer_to_receive_audio,
                TrackKind::Video => options.offer_to_receive_video,
            };
            match state.local_tracks.iter().find(|t| t.kind == kind) {
                Some(track) => media.push((kind, Some(track), "sendrecv")),
                None if wanted => media.push((kind, None, "recvonly")),
                None => {}
            }
        }

        Ok(SessionDescription::offer(self.render_sdp(&media)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, StreamRtcError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;

        let remote = match &state.remote {
            Some(desc) if desc.sdp_type == SdpType::Offer => desc,
            _ => {
                return Err(StreamRtcError::Negotiation {
                    reason: "cannot create an answer without a remote offer".to_string(),
                })
            }
        };

        let media: Vec<(TrackKind, Option<&TrackInfo>, &str)> = media_kinds(&remote.sdp)
            .into_iter()
            .map(|kind| match state.local_tracks.iter().find(|t| t.kind == kind) {
                Some(track) => (kind, Some(track), "sendrecv"),
                None => (kind, None, "recvonly"),
            })
            .collect();

        Ok(SessionDescription::answer(self.render_sdp(&media)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), StreamRtcError> {
        let gather = {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;

            if desc.sdp_type == SdpType::Answer
                && !matches!(&state.remote, Some(r) if r.sdp_type == SdpType::Offer)
            {
                return Err(StreamRtcError::Negotiation {
                    reason: "local answer applied without a remote offer".to_string(),
                });
            }

            state.local = Some(desc);
            if state.remote.is_some() {
                self.transition(&mut state, PeerConnectionState::Connecting);
            }

            let gather = !state.gathered;
            state.gathered = true;
            gather
        };

        if gather {
            self.gather();
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), StreamRtcError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        if !desc.sdp.starts_with("v=0") {
            return Err(StreamRtcError::Negotiation {
                reason: "malformed session description".to_string(),
            });
        }
        if state.remote.is_some() {
            return Err(StreamRtcError::Negotiation {
                reason: format!("remote {} applied in stable state", desc.sdp_type),
            });
        }
        if desc.sdp_type == SdpType::Answer
            && !matches!(&state.local, Some(l) if l.sdp_type == SdpType::Offer)
        {
            return Err(StreamRtcError::Negotiation {
                reason: "remote answer applied without a local offer".to_string(),
            });
        }

        let announced = announced_stream(&desc.sdp);
        state.remote = Some(desc);
        if let Some(stream) = announced {
            let _ = self.events.send(PeerEvent::Track(stream));
        }
        if state.local.is_some() {
            self.transition(&mut state, PeerConnectionState::Connecting);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), StreamRtcError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        if state.remote.is_none() {
            return Err(StreamRtcError::Negotiation {
                reason: "remote description not set".to_string(),
            });
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(StreamRtcError::Negotiation {
                reason: format!("malformed candidate '{}'", candidate.candidate),
            });
        }

        state.remote_candidates.push(candidate);
        if state.connection == PeerConnectionState::Connecting {
            self.transition(&mut state, PeerConnectionState::Connected);
        }
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().connection
    }

    async fn close(&self) -> Result<(), StreamRtcError> {
        let mut state = self.state.lock();
        if !state.closed {
            debug!(connection = %self.id, "loopback connection closed");
        }
        state.closed = true;
        state.connection = PeerConnectionState::Closed;
        Ok(())
    }
}

/// Factory producing loopback connections and remembering each one
#[derive(Debug, Default)]
pub struct LoopbackFactory {
    options: LoopbackOptions,
    created: Mutex<Vec<Arc<LoopbackTransport>>>,
}

impl LoopbackFactory {
    /// Factory with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with explicit options
    pub fn with_options(options: LoopbackOptions) -> Self {
        Self {
            options,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Number of connections built so far
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Every connection built so far, oldest first
    pub fn transports(&self) -> Vec<Arc<LoopbackTransport>> {
        self.created.lock().clone()
    }

    /// Most recently built connection
    pub fn latest(&self) -> Option<Arc<LoopbackTransport>> {
        self.created.lock().last().cloned()
    }

    /// Number of connections not yet closed
    pub fn open_count(&self) -> usize {
        self.created.lock().iter().filter(|t| !t.is_closed()).count()
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn create(
        &self,
        config: &IceConfig,
    ) -> Result<(Arc<dyn PeerTransport>, PeerEvents), StreamRtcError> {
        let (transport, events) = LoopbackTransport::new(self.options.clone(), config.clone());
        self.created.lock().push(transport.clone());
        debug!(
            connection = %transport.id(),
            servers = config.ice_servers.len(),
            pool = config.ice_candidate_pool_size,
            "loopback connection created"
        );
        Ok((transport, events))
    }
}
