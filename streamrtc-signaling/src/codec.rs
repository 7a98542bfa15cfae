//! Signal codec
//!
//! Converts session descriptions and ICE candidates to and from the
//! storage-safe JSON shape written to the document store. The store rejects
//! undefined values and functions anywhere in a payload, so everything that
//! goes out is passed through [`sanitize`] first.

use crate::protocol::{AnswerRecord, BaseRecord, CandidateRecord, StreamRecord};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use streamrtc_core::{Document, IceCandidateInit, SessionDescription, StreamRtcError};

/// In-memory value tree prior to persistence
///
/// Mirrors JSON but can also hold the two kinds of value the store cannot
/// persist: an unset field and a callable.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Field present but never assigned
    Undefined,
    /// Callable value, identified by name
    Function(String),
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// Number
    Number(Number),
    /// String
    String(String),
    /// Ordered list
    Array(Vec<RawValue>),
    /// Keyed object
    Object(BTreeMap<String, RawValue>),
}

impl RawValue {
    /// Empty object
    pub fn object() -> Self {
        RawValue::Object(BTreeMap::new())
    }

    /// Builder-style field insertion; no-op on non-objects
    pub fn with(mut self, key: &str, value: impl Into<RawValue>) -> Self {
        if let RawValue::Object(map) = &mut self {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Whether the store would reject this value outright
    pub fn is_unpersistable(&self) -> bool {
        matches!(self, RawValue::Undefined | RawValue::Function(_))
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Number(n) => RawValue::Number(n),
            Value::String(s) => RawValue::String(s),
            Value::Array(items) => RawValue::Array(items.into_iter().map(RawValue::from).collect()),
            Value::Object(map) => RawValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, RawValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::String(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::String(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Number(value.into())
    }
}

/// Unset options become `Undefined`, so [`sanitize`] drops them
impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => RawValue::Undefined,
        }
    }
}

/// Deep-copy a value tree without undefined values or functions
///
/// Object keys holding either are dropped at every depth. Array slots holding
/// either become `null` so positions are preserved. A top-level unpersistable
/// value becomes `null`.
pub fn sanitize(value: &RawValue) -> Value {
    match value {
        RawValue::Undefined | RawValue::Function(_) | RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(*b),
        RawValue::Number(n) => Value::Number(n.clone()),
        RawValue::String(s) => Value::String(s.clone()),
        RawValue::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        RawValue::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_unpersistable())
                .map(|(k, v)| (k.clone(), sanitize(v)))
                .collect::<Map<String, Value>>(),
        ),
    }
}

fn serialize_description(desc: Option<&SessionDescription>) -> Option<Value> {
    desc.map(|d| {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(d.sdp_type.to_string()));
        map.insert("sdp".to_string(), Value::String(d.sdp.clone()));
        Value::Object(map)
    })
}

/// Storage shape of an offer, `None` when there is none
pub fn serialize_offer(desc: Option<&SessionDescription>) -> Option<Value> {
    serialize_description(desc)
}

/// Storage shape of an answer, `None` when there is none
pub fn serialize_answer(desc: Option<&SessionDescription>) -> Option<Value> {
    serialize_description(desc)
}

/// Storage shape of a local candidate
///
/// Returns `None` for an absent candidate and for the end-of-candidates
/// marker (empty candidate line), so neither ever reaches storage.
pub fn serialize_ice_candidate(candidate: Option<&IceCandidateInit>) -> Option<Value> {
    let candidate = candidate?;
    if candidate.candidate.is_empty() {
        return None;
    }

    let mut map = Map::new();
    map.insert(
        "candidate".to_string(),
        Value::String(candidate.candidate.clone()),
    );
    map.insert(
        "sdpMid".to_string(),
        candidate
            .sdp_mid
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    map.insert(
        "sdpMLineIndex".to_string(),
        candidate
            .sdp_m_line_index
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    Some(Value::Object(map))
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, StreamRtcError> {
    serde_json::from_value(value).map_err(|e| StreamRtcError::InvalidData {
        reason: format!("malformed {}: {}", what, e),
    })
}

/// Signaling base record read back from storage
pub fn decode_base(doc: &Document) -> Result<BaseRecord, StreamRtcError> {
    decode(Value::Object(doc.clone()), "base record")
}

/// Storage shape of a stream listing
pub fn serialize_stream_record(record: &StreamRecord) -> Result<RawValue, StreamRtcError> {
    Ok(RawValue::from(serde_json::to_value(record)?))
}

/// Answer record read back from storage
pub fn decode_answer(doc: &Document) -> Result<AnswerRecord, StreamRtcError> {
    decode(Value::Object(doc.clone()), "answer record")
}

/// Candidate record read back from storage
pub fn decode_candidate(doc: &Document) -> Result<CandidateRecord, StreamRtcError> {
    decode(Value::Object(doc.clone()), "candidate record")
}

/// Top-level object of a sanitized payload
pub fn into_document(value: Value) -> Result<Document, StreamRtcError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StreamRtcError::InvalidData {
            reason: format!("signal payload must be an object, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;
    use serde_json::json;

    #[test]
    fn test_offer_and_answer_shapes() {
        assert!(serialize_offer(None).is_none());
        assert!(serialize_answer(None).is_none());

        let offer = SessionDescription::offer("v=0\r\n");
        assert_eq!(
            serialize_offer(Some(&offer)),
            Some(json!({"type": "offer", "sdp": "v=0\r\n"}))
        );

        // the SDP blob is passed through untouched, however odd
        let answer = SessionDescription::answer("not really sdp");
        assert_eq!(
            serialize_answer(Some(&answer)).unwrap()["sdp"],
            json!("not really sdp")
        );
    }

    #[test]
    fn test_end_of_candidates_is_never_serialized() {
        assert!(serialize_ice_candidate(None).is_none());
        assert!(serialize_ice_candidate(Some(&IceCandidateInit::default())).is_none());

        // only an empty line marks the end; anything else is passed on
        let blank = IceCandidateInit {
            candidate: "   ".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };
        let value = serialize_ice_candidate(Some(&blank)).unwrap();
        assert_eq!(value["candidate"], json!("   "));
    }

    #[test]
    fn test_candidate_optional_fields_become_null() {
        let candidate = IceCandidateInit {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        let value = serialize_ice_candidate(Some(&candidate)).unwrap();
        let map = value.as_object().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["sdpMid"], Value::Null);
        assert_eq!(map["sdpMLineIndex"], Value::Null);
    }

    #[test]
    fn test_sanitize_drops_unpersistable_fields() {
        let raw = RawValue::object()
            .with("candidate", "candidate:1")
            .with("sdpMid", Option::<String>::None)
            .with("onerror", RawValue::Function("onerror".to_string()))
            .with(
                "nested",
                RawValue::object()
                    .with("keep", 1i64)
                    .with("drop", RawValue::Undefined)
                    .with(
                        "list",
                        RawValue::Array(vec![
                            RawValue::from("a"),
                            RawValue::Undefined,
                            RawValue::object().with("f", RawValue::Function("f".to_string())),
                        ]),
                    ),
            );

        let clean = sanitize(&raw);
        assert_eq!(
            clean,
            json!({
                "candidate": "candidate:1",
                "nested": {"keep": 1, "list": ["a", null, {}]}
            })
        );
    }

    #[test]
    fn test_sanitize_passes_primitives_through() {
        assert_eq!(sanitize(&RawValue::from(true)), json!(true));
        assert_eq!(sanitize(&RawValue::from("x")), json!("x"));
        assert_eq!(sanitize(&RawValue::from(7i64)), json!(7));
        assert_eq!(sanitize(&RawValue::Null), Value::Null);
        assert_eq!(sanitize(&RawValue::Undefined), Value::Null);
    }

    #[test]
    fn test_sanitize_keeps_json_input_intact() {
        let original = json!({"a": [1, {"b": null}], "c": "d"});
        assert_eq!(sanitize(&RawValue::from(original.clone())), original);
    }

    #[test]
    fn test_decode_records() {
        let doc = into_document(json!({
            "candidate": "candidate:1",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "role": "viewer"
        }))
        .unwrap();
        assert_eq!(decode_candidate(&doc).unwrap().role, Role::Viewer);

        let bad = into_document(json!({"candidate": "candidate:1", "role": "moderator"})).unwrap();
        assert_eq!(decode_candidate(&bad).unwrap_err().error_code(), "INVALID_DATA");

        assert!(into_document(json!([1, 2])).is_err());
    }

    #[test]
    fn test_base_record_decodes_offer() {
        let waiting = into_document(json!({"hostId": "U1", "isLive": true, "createdAt": 1000})).unwrap();
        assert!(decode_base(&waiting).unwrap().offer.is_none());

        let ready = into_document(json!({
            "hostId": "U1",
            "isLive": true,
            "offer": {"type": "offer", "sdp": "v=0"},
            "timestamp": 1001
        }))
        .unwrap();
        let base = decode_base(&ready).unwrap();
        assert_eq!(base.offer, Some(SessionDescription::offer("v=0")));
        assert_eq!(base.host_id.as_deref(), Some("U1"));

        let broken = into_document(json!({"offer": {"sdp": "v=0"}})).unwrap();
        assert_eq!(decode_base(&broken).unwrap_err().error_code(), "INVALID_DATA");
    }

    #[test]
    fn test_stream_record_shape() {
        let record = StreamRecord {
            host_id: "U1".to_string(),
            host_name: Some("Ada".to_string()),
            is_live: true,
            created_at: 1000,
        };
        let value = sanitize(&serialize_stream_record(&record).unwrap());
        assert_eq!(
            value,
            json!({"hostId": "U1", "hostName": "Ada", "isLive": true, "createdAt": 1000})
        );
    }
}
