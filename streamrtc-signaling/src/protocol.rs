//! Signal record shapes stored in the document store
//!
//! These records are the de facto wire protocol between host and viewer.
//! Field names are camelCase because both sides read them straight out of
//! shared documents.

use serde::{Deserialize, Serialize};
use std::fmt;
use streamrtc_core::{IceCandidateInit, SessionDescription};

/// Field holding the offer on the base record
pub const OFFER_FIELD: &str = "offer";
/// Liveness flag on the base and stream records
pub const LIVE_FIELD: &str = "isLive";
/// Field every signal write is stamped with
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Side of the stream a participant plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Publishes media and creates the offer
    Host,
    /// Receives media and answers
    Viewer,
}

impl Role {
    /// Side whose candidates this role applies
    pub fn remote(&self) -> Role {
        match self {
            Role::Host => Role::Viewer,
            Role::Viewer => Role::Host,
        }
    }

    /// Tag written on records
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base signaling record: offer plus liveness flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseRecord {
    /// Host identity
    #[serde(default)]
    pub host_id: Option<String>,
    /// Offer, absent until the host has negotiated
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    /// Cleared when the host stops
    #[serde(default)]
    pub is_live: bool,
}

/// Answer appended by a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Session description of the answer
    #[serde(flatten)]
    pub description: SessionDescription,
    /// Viewer identity
    #[serde(default)]
    pub from: Option<String>,
}

/// ICE candidate appended by either side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// m-line index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
    /// Sender identity
    #[serde(default)]
    pub from: Option<String>,
    /// Sender role
    pub role: Role,
}

impl CandidateRecord {
    /// Candidate in the shape the transport accepts
    pub fn to_init(&self) -> IceCandidateInit {
        IceCandidateInit {
            candidate: self.candidate.clone(),
            sdp_mid: self.sdp_mid.clone(),
            sdp_m_line_index: self.sdp_m_line_index,
        }
    }
}

/// Public stream listing record under `liveStreams`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    /// Host identity
    pub host_id: String,
    /// Host display name
    #[serde(default)]
    pub host_name: Option<String>,
    /// Whether the stream is currently live
    pub is_live: bool,
    /// Creation time in milliseconds since the epoch
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_tags() {
        assert_eq!(serde_json::to_value(Role::Host).unwrap(), json!("host"));
        assert_eq!(Role::Viewer.remote(), Role::Host);
        assert_eq!(Role::Host.remote(), Role::Viewer);
    }

    #[test]
    fn test_base_record_without_offer() {
        let base: BaseRecord =
            serde_json::from_value(json!({"hostId": "U1", "isLive": true, "timestamp": 1}))
                .unwrap();
        assert!(base.offer.is_none());
        assert!(base.is_live);
    }

    #[test]
    fn test_answer_record_flattens_description() {
        let answer: AnswerRecord = serde_json::from_value(
            json!({"type": "answer", "sdp": "v=0", "from": "V1", "timestamp": 5}),
        )
        .unwrap();
        assert_eq!(answer.description, SessionDescription::answer("v=0"));
        assert_eq!(answer.from.as_deref(), Some("V1"));
    }

    #[test]
    fn test_candidate_record_roundtrip_shape() {
        let record: CandidateRecord = serde_json::from_value(json!({
            "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
            "sdpMid": null,
            "sdpMLineIndex": 0,
            "from": "U1",
            "role": "host"
        }))
        .unwrap();
        assert_eq!(record.role, Role::Host);
        assert_eq!(record.to_init().sdp_m_line_index, Some(0));
        assert!(record.to_init().sdp_mid.is_none());
    }
}
