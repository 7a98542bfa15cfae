//! Peer-connection transport abstraction
//!
//! A [`PeerTransport`] is one offer/answer/ICE negotiating connection. It is
//! built by a [`TransportFactory`] which also hands back the receiving end of
//! the connection's event feed, so event handling is wired once at
//! construction time instead of by assigning callbacks later.

pub mod loopback;

use crate::error::StreamRtcError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use loopback::{LoopbackFactory, LoopbackOptions, LoopbackTransport};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial offer
    Offer,
    /// Final answer
    Answer,
    /// Provisional answer
    Pranswer,
    /// Roll back to the last stable state
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Session description: opaque SDP blob plus its type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP text, never inspected by the signaling layer
    pub sdp: String,
}

impl SessionDescription {
    /// Offer with the given SDP
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer with the given SDP
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as produced or consumed by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    /// Candidate attribute line; empty marks end of candidates
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line the candidate belongs to
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

/// Connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    /// Created, nothing attempted yet
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity failed
    Failed,
    /// Closed locally
    Closed,
}

impl PeerConnectionState {
    /// Status line shown to the user
    pub fn describe(&self) -> &'static str {
        match self {
            PeerConnectionState::New => "Preparing connection",
            PeerConnectionState::Connecting => "Connecting...",
            PeerConnectionState::Connected => "Connected",
            PeerConnectionState::Disconnected => "Connection interrupted",
            PeerConnectionState::Failed => "Connection failed",
            PeerConnectionState::Closed => "Connection closed",
        }
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Description of a local track handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Track id
    pub id: String,
    /// Media kind
    pub kind: TrackKind,
    /// Id of the media stream the track belongs to
    pub stream_id: String,
}

/// Remote media stream surfaced by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    /// Remote stream id
    pub id: String,
    /// Tracks carried by the stream
    pub tracks: Vec<TrackInfo>,
}

/// Options for offer creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOptions {
    /// Ask the remote side to send audio
    pub offer_to_receive_audio: bool,
    /// Ask the remote side to send video
    pub offer_to_receive_video: bool,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            offer_to_receive_audio: true,
            offer_to_receive_video: true,
        }
    }
}

/// STUN or TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (`stun:` / `turn:`)
    pub urls: Vec<String>,
    /// TURN username
    pub username: Option<String>,
    /// TURN credential
    pub credential: Option<String>,
}

impl IceServer {
    /// STUN server without credentials
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }

    /// TURN relay with credentials
    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }
}

/// Relay/reflection configuration for new connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceConfig {
    /// STUN/TURN servers
    pub ice_servers: Vec<IceServer>,
    /// Number of candidates to pre-gather
    pub ice_candidate_pool_size: u8,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
                IceServer::turn(
                    "turn:openrelay.metered.ca:80",
                    "openrelayproject",
                    "openrelayproject",
                ),
            ],
            ice_candidate_pool_size: 10,
        }
    }
}

/// Event emitted by a live connection
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Local candidate gathered; `None` or an empty candidate marks the end
    IceCandidate(Option<IceCandidateInit>),
    /// Remote media arrived
    Track(RemoteStream),
    /// Transport changed connection state
    ConnectionStateChanged(PeerConnectionState),
}

/// Receiving end of a connection's event feed
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// One negotiating peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync + fmt::Debug {
    /// Add a local track to be sent
    async fn add_track(&self, track: TrackInfo) -> Result<(), StreamRtcError>;

    /// Swap the outgoing track of the given kind without renegotiation
    async fn replace_track(&self, kind: TrackKind, track: TrackInfo) -> Result<(), StreamRtcError>;

    /// Create an offer
    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, StreamRtcError>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, StreamRtcError>;

    /// Apply a local description; starts candidate gathering
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), StreamRtcError>;

    /// Apply the remote side's description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), StreamRtcError>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), StreamRtcError>;

    /// Current connection state
    fn connection_state(&self) -> PeerConnectionState;

    /// Close the connection; idempotent
    async fn close(&self) -> Result<(), StreamRtcError>;
}

/// Builds peer connections
#[async_trait]
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Build a connection for the given relay/reflection configuration
    async fn create(
        &self,
        config: &IceConfig,
    ) -> Result<(Arc<dyn PeerTransport>, PeerEvents), StreamRtcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_wire_shape() {
        let desc = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0"}));

        let back: SessionDescription =
            serde_json::from_value(serde_json::json!({"type": "answer", "sdp": "x"})).unwrap();
        assert_eq!(back.sdp_type, SdpType::Answer);
    }

    #[test]
    fn test_candidate_wire_shape() {
        let candidate = IceCandidateInit {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: None,
            sdp_m_line_index: Some(0),
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert!(json["sdpMid"].is_null());
        assert_eq!(json["sdpMLineIndex"], serde_json::json!(0));
    }

    #[test]
    fn test_default_ice_config() {
        let config = IceConfig::default();
        assert_eq!(config.ice_candidate_pool_size, 10);
        assert!(config
            .ice_servers
            .iter()
            .any(|s| s.urls[0].starts_with("stun:")));
        assert!(config
            .ice_servers
            .iter()
            .any(|s| s.urls[0].starts_with("turn:") && s.credential.is_some()));
    }
}
