//! Path-addressed document store abstraction
//!
//! Signaling state lives in a shared document database. Paths alternate
//! collection and document segments, so a path with an odd number of
//! segments names a collection and an even number names a document:
//!
//! ```text
//! signaling                      collection
//! signaling/U1-1000              document
//! signaling/U1-1000/candidates   collection
//! ```

pub mod memory;

use crate::error::{StoreError, StreamRtcError};
use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

pub use memory::MemoryStore;

/// Field map stored at a document address
pub type Document = Map<String, Value>;

/// Key of the sentinel object the store replaces with its own clock
pub const SERVER_TIMESTAMP_SENTINEL: &str = "__serverTimestamp";

/// Value that the store resolves to its server-side write time
pub fn server_timestamp() -> Value {
    let mut sentinel = Map::new();
    sentinel.insert(SERVER_TIMESTAMP_SENTINEL.to_string(), Value::Bool(true));
    Value::Object(sentinel)
}

/// Whether `value` is the server timestamp sentinel
pub fn is_server_timestamp(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.len() == 1 && map.contains_key(SERVER_TIMESTAMP_SENTINEL),
        _ => false,
    }
}

/// Slash-separated address in the document store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    /// Parse a path, rejecting empty input and empty segments
    pub fn parse(path: &str) -> Result<Self, StreamRtcError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(StreamRtcError::InvalidPath {
                path: path.to_string(),
                reason: "path is empty".to_string(),
            });
        }

        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StreamRtcError::InvalidPath {
                path: path.to_string(),
                reason: "path contains an empty segment".to_string(),
            });
        }

        Ok(Self { segments })
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false for a parsed path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Odd segment count
    pub fn is_collection(&self) -> bool {
        self.segments.len() % 2 == 1
    }

    /// Even segment count
    pub fn is_document(&self) -> bool {
        !self.is_collection()
    }

    /// Last segment
    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Path with `segment` appended
    pub fn child(&self, segment: &str) -> Result<Self, StreamRtcError> {
        if segment.is_empty() || segment.contains('/') {
            return Err(StreamRtcError::InvalidPath {
                path: format!("{}/{}", self, segment),
                reason: "child segment must be non-empty and contain no '/'".to_string(),
            });
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Path without its last segment, if any remains
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Reference to a collection (odd-length path)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef(DocPath);

impl CollectionRef {
    /// Build a collection reference, validating the segment count
    pub fn new(path: &str) -> Result<Self, StreamRtcError> {
        Self::from_path(DocPath::parse(path)?)
    }

    /// Wrap an already parsed path
    pub fn from_path(path: DocPath) -> Result<Self, StreamRtcError> {
        if !path.is_collection() {
            return Err(StreamRtcError::InvalidPath {
                path: path.to_string(),
                reason: format!("collection paths need an odd segment count, got {}", path.len()),
            });
        }
        Ok(Self(path))
    }

    /// Document with the given id inside this collection
    pub fn doc(&self, id: &str) -> Result<DocumentRef, StreamRtcError> {
        DocumentRef::from_path(self.0.child(id)?)
    }

    /// Underlying path
    pub fn path(&self) -> &DocPath {
        &self.0
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to a document (even-length path)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef(DocPath);

impl DocumentRef {
    /// Build a document reference, validating the segment count
    pub fn new(path: &str) -> Result<Self, StreamRtcError> {
        Self::from_path(DocPath::parse(path)?)
    }

    /// Wrap an already parsed path
    pub fn from_path(path: DocPath) -> Result<Self, StreamRtcError> {
        if !path.is_document() {
            return Err(StreamRtcError::InvalidPath {
                path: path.to_string(),
                reason: format!("document paths need an even segment count, got {}", path.len()),
            });
        }
        Ok(Self(path))
    }

    /// Sub-collection under this document
    pub fn collection(&self, name: &str) -> Result<CollectionRef, StreamRtcError> {
        CollectionRef::from_path(self.0.child(name)?)
    }

    /// Collection this document belongs to
    pub fn parent(&self) -> CollectionRef {
        // Even-length paths always have an odd-length parent
        CollectionRef(self.0.parent().unwrap_or_else(|| self.0.clone()))
    }

    /// Document id (last segment)
    pub fn id(&self) -> &str {
        self.0.leaf()
    }

    /// Underlying path
    pub fn path(&self) -> &DocPath {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of change delivered by a live query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Document appeared (including existing documents on attach)
    Added,
    /// Existing document was updated
    Modified,
    /// Document was deleted
    Removed,
}

/// Single change notification from a live query
#[derive(Debug, Clone)]
pub struct DocumentChange {
    /// What happened
    pub kind: ChangeKind,
    /// Id of the affected document
    pub id: String,
    /// Document contents after the change
    pub data: Document,
}

/// Live query over a collection
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<DocumentChange>,
}

impl Subscription {
    /// Wrap the receiving end of a change feed
    pub fn new(receiver: mpsc::UnboundedReceiver<DocumentChange>) -> Self {
        Self { receiver }
    }

    /// Next change, or `None` once the store drops the feed
    pub async fn next_change(&mut self) -> Option<DocumentChange> {
        self.receiver.recv().await
    }

    /// Stop receiving changes
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Stream for Subscription {
    type Item = DocumentChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Shared document database used as the signaling channel
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Read a document, `None` when absent
    async fn get(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError>;

    /// Write a document; with `merge` the fields are merged into any existing ones
    async fn set(&self, doc: &DocumentRef, data: Document, merge: bool) -> Result<(), StoreError>;

    /// Append a document with a generated id, returning the id
    async fn add(&self, collection: &CollectionRef, data: Document) -> Result<String, StoreError>;

    /// Attach a live query; existing documents are delivered once as `Added`
    async fn subscribe(&self, collection: &CollectionRef) -> Result<Subscription, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_shape() {
        let coll = DocPath::parse("signaling").unwrap();
        assert!(coll.is_collection());

        let doc = DocPath::parse("signaling/U1-1000").unwrap();
        assert!(doc.is_document());
        assert_eq!(doc.leaf(), "U1-1000");

        let nested = DocPath::parse("/signaling/U1-1000/candidates/").unwrap();
        assert_eq!(nested.len(), 3);
        assert_eq!(nested.to_string(), "signaling/U1-1000/candidates");
    }

    #[test]
    fn test_path_rejects_empty_segments() {
        assert!(DocPath::parse("").is_err());
        assert!(DocPath::parse("//").is_err());
        assert!(DocPath::parse("signaling//answers").is_err());
    }

    #[test]
    fn test_refs_validate_parity() {
        assert!(CollectionRef::new("signaling/U1-1000").is_err());
        assert!(DocumentRef::new("signaling").is_err());

        let base = DocumentRef::new("signaling/U1-1000").unwrap();
        let answers = base.collection("answers").unwrap();
        assert_eq!(answers.to_string(), "signaling/U1-1000/answers");

        let answer = answers.doc("a1").unwrap();
        assert_eq!(answer.id(), "a1");
        assert_eq!(answer.parent(), answers);
        assert_eq!(base.parent().to_string(), "signaling");
    }

    #[test]
    fn test_server_timestamp_sentinel() {
        assert!(is_server_timestamp(&server_timestamp()));
        assert!(!is_server_timestamp(&Value::from(12)));
        assert!(!is_server_timestamp(&serde_json::json!({"a": 1})));
    }
}
