//! Signal channel over the document store
//!
//! Every signal write is sanitized, stamped with a server timestamp, logged
//! with its path and payload, and reported to any registered
//! [`SignalObserver`]. Failed writes are logged with the store's error code
//! and message and then returned to the caller.

use crate::codec::{into_document, sanitize, RawValue};
use crate::protocol::TIMESTAMP_FIELD;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use streamrtc_core::{
    server_timestamp, ChangeKind, CollectionRef, DocPath, Document, DocumentRef, DocumentStore,
    StoreError, StreamRtcError, Subscription,
};
use tracing::{debug, error, info, warn};

/// Top-level collection holding one base record per stream
pub const SIGNALING_COLLECTION: &str = "signaling";
/// Top-level collection listing streams
pub const STREAMS_COLLECTION: &str = "liveStreams";
/// Sub-collection of viewer answers
pub const ANSWERS_COLLECTION: &str = "answers";
/// Sub-collection of candidates from both sides
pub const CANDIDATES_COLLECTION: &str = "candidates";

/// Where a signal goes and therefore how it is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalTarget {
    /// Collection: append a new record
    Append(CollectionRef),
    /// Document: merge fields into it
    Merge(DocumentRef),
}

impl SignalTarget {
    /// Classify a raw path by segment count: odd appends, even merges
    pub fn from_path(path: &str) -> Result<Self, StreamRtcError> {
        let parsed = DocPath::parse(path)?;
        if parsed.is_collection() {
            Ok(SignalTarget::Append(CollectionRef::from_path(parsed)?))
        } else {
            Ok(SignalTarget::Merge(DocumentRef::from_path(parsed)?))
        }
    }

    /// Path of the target
    pub fn path(&self) -> &DocPath {
        match self {
            SignalTarget::Append(c) => c.path(),
            SignalTarget::Merge(d) => d.path(),
        }
    }

    /// Write mode the target implies
    pub fn mode(&self) -> WriteMode {
        match self {
            SignalTarget::Append(_) => WriteMode::Append,
            SignalTarget::Merge(_) => WriteMode::Merge,
        }
    }
}

impl From<CollectionRef> for SignalTarget {
    fn from(value: CollectionRef) -> Self {
        SignalTarget::Append(value)
    }
}

impl From<DocumentRef> for SignalTarget {
    fn from(value: DocumentRef) -> Self {
        SignalTarget::Merge(value)
    }
}

/// Signaling addresses of one stream, all keyed by the stream id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRefs {
    /// Stream identifier
    pub stream_id: String,
    /// Base record: offer plus liveness flag
    pub base: DocumentRef,
    /// Append-only viewer answers
    pub answers: CollectionRef,
    /// Append-only candidates from both sides
    pub candidates: CollectionRef,
}

/// Build the base/answers/candidates references for a stream
pub fn make_channel_refs(stream_id: &str) -> Result<ChannelRefs, StreamRtcError> {
    let base = CollectionRef::new(SIGNALING_COLLECTION)?.doc(stream_id)?;
    Ok(ChannelRefs {
        stream_id: stream_id.to_string(),
        answers: base.collection(ANSWERS_COLLECTION)?,
        candidates: base.collection(CANDIDATES_COLLECTION)?,
        base,
    })
}

/// Public listing record of a stream
pub fn stream_record_ref(stream_id: &str) -> Result<DocumentRef, StreamRtcError> {
    CollectionRef::new(STREAMS_COLLECTION)?.doc(stream_id)
}

/// How a signal was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// New record appended to a collection
    Append,
    /// Fields merged into a document
    Merge,
}

/// Result of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalReceipt {
    /// Record appended with this id
    Appended {
        /// Generated record id
        id: String,
    },
    /// Fields merged
    Merged,
}

/// Outcome of one signal write, as reported to observers
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    /// Caller-supplied label
    pub label: String,
    /// Path written
    pub path: String,
    /// Append or merge
    pub mode: WriteMode,
    /// Generated id for appends
    pub record_id: Option<String>,
    /// Store error code on failure
    pub error_code: Option<String>,
    /// Store error message on failure
    pub error_message: Option<String>,
    /// Sanitized payload that was sent
    pub data: Value,
    /// Local time of the outcome
    pub at: DateTime<Utc>,
}

impl WriteOutcome {
    /// Whether the store accepted the write
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}

/// Receives every signal write outcome
pub trait SignalObserver: Send + Sync + fmt::Debug {
    /// Called once per write, after the store responds
    fn on_write(&self, outcome: &WriteOutcome);
}

/// Signal writes and live queries against the shared store
#[derive(Debug, Clone)]
pub struct SignalChannel {
    store: Arc<dyn DocumentStore>,
    observers: Arc<RwLock<Vec<Arc<dyn SignalObserver>>>>,
}

impl SignalChannel {
    /// Channel over the given store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Register an observer for write outcomes
    pub fn add_observer(&self, observer: Arc<dyn SignalObserver>) {
        self.observers.write().push(observer);
    }

    fn prepare(data: &RawValue) -> Result<Document, StreamRtcError> {
        let mut doc = into_document(sanitize(data))?;
        doc.insert(TIMESTAMP_FIELD.to_string(), server_timestamp());
        Ok(doc)
    }

    fn report(
        &self,
        label: &str,
        path: &DocPath,
        mode: WriteMode,
        result: Result<Option<&str>, &StoreError>,
        data: Value,
    ) {
        let (record_id, error_code, error_message) = match result {
            Ok(id) => (id.map(str::to_string), None, None),
            Err(e) => (None, Some(e.code.clone()), Some(e.message.clone())),
        };
        let outcome = WriteOutcome {
            label: label.to_string(),
            path: path.to_string(),
            mode,
            record_id,
            error_code,
            error_message,
            data,
            at: Utc::now(),
        };
        for observer in self.observers.read().iter() {
            observer.on_write(&outcome);
        }
    }

    /// Append a sanitized, timestamped record; returns its id
    pub async fn safe_add(
        &self,
        collection: &CollectionRef,
        data: RawValue,
        label: &str,
    ) -> Result<String, StreamRtcError> {
        let doc = Self::prepare(&data)?;
        let payload = Value::Object(doc.clone());

        match self.store.add(collection, doc).await {
            Ok(id) => {
                info!(label, path = %collection, id = %id, data = %payload, "signal appended");
                self.report(label, collection.path(), WriteMode::Append, Ok(Some(&id)), payload);
                Ok(id)
            }
            Err(e) => {
                error!(
                    label,
                    path = %collection,
                    code = %e.code,
                    message = %e.message,
                    data = %payload,
                    "signal append failed"
                );
                self.report(label, collection.path(), WriteMode::Append, Err(&e), payload);
                Err(StreamRtcError::SignalWrite {
                    label: label.to_string(),
                    path: collection.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Merge sanitized, timestamped fields into a document
    pub async fn safe_set(
        &self,
        doc_ref: &DocumentRef,
        data: RawValue,
        label: &str,
    ) -> Result<(), StreamRtcError> {
        let doc = Self::prepare(&data)?;
        let payload = Value::Object(doc.clone());

        match self.store.set(doc_ref, doc, true).await {
            Ok(()) => {
                info!(label, path = %doc_ref, data = %payload, "signal merged");
                self.report(label, doc_ref.path(), WriteMode::Merge, Ok(None), payload);
                Ok(())
            }
            Err(e) => {
                error!(
                    label,
                    path = %doc_ref,
                    code = %e.code,
                    message = %e.message,
                    data = %payload,
                    "signal merge failed"
                );
                self.report(label, doc_ref.path(), WriteMode::Merge, Err(&e), payload);
                Err(StreamRtcError::SignalWrite {
                    label: label.to_string(),
                    path: doc_ref.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Append to collections, merge into documents
    pub async fn safe_send_signal(
        &self,
        target: &SignalTarget,
        data: RawValue,
        label: &str,
    ) -> Result<SignalReceipt, StreamRtcError> {
        debug!(label, path = %target.path(), mode = ?target.mode(), "dispatching signal");
        match target {
            SignalTarget::Append(collection) => self
                .safe_add(collection, data, label)
                .await
                .map(|id| SignalReceipt::Appended { id }),
            SignalTarget::Merge(doc) => self
                .safe_set(doc, data, label)
                .await
                .map(|()| SignalReceipt::Merged),
        }
    }

    /// Read a document
    pub async fn read(&self, doc: &DocumentRef) -> Result<Option<Document>, StreamRtcError> {
        self.store.get(doc).await.map_err(|e| {
            warn!(path = %doc, code = %e.code, message = %e.message, "signal read failed");
            StreamRtcError::StoreRead {
                path: doc.to_string(),
                source: e,
            }
        })
    }

    /// Live query yielding each newly added record exactly once
    pub async fn watch_added(&self, collection: &CollectionRef) -> Result<AddedRecords, StreamRtcError> {
        let subscription = self.store.subscribe(collection).await.map_err(|e| {
            error!(path = %collection, code = %e.code, message = %e.message, "subscribe failed");
            StreamRtcError::StoreRead {
                path: collection.to_string(),
                source: e,
            }
        })?;
        debug!(path = %collection, "watching for added records");
        Ok(AddedRecords {
            collection: collection.to_string(),
            subscription,
            seen: HashSet::new(),
        })
    }
}

/// Added-only, de-duplicated view of a live query
#[derive(Debug)]
pub struct AddedRecords {
    collection: String,
    subscription: Subscription,
    seen: HashSet<String>,
}

impl AddedRecords {
    /// Next record not seen before, or `None` when the feed ends
    pub async fn next(&mut self) -> Option<(String, Document)> {
        while let Some(change) = self.subscription.next().await {
            if change.kind != ChangeKind::Added {
                continue;
            }
            if !self.seen.insert(change.id.clone()) {
                debug!(path = %self.collection, id = %change.id, "duplicate delivery skipped");
                continue;
            }
            return Some((change.id, change.data));
        }
        None
    }

    /// Number of distinct records yielded
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_refs_share_stream_id() {
        let refs = make_channel_refs("U1-1000").unwrap();
        assert_eq!(refs.base.to_string(), "signaling/U1-1000");
        assert_eq!(refs.answers.to_string(), "signaling/U1-1000/answers");
        assert_eq!(refs.candidates.to_string(), "signaling/U1-1000/candidates");
        assert_eq!(refs.base.id(), "U1-1000");
    }

    #[test]
    fn test_channel_refs_reject_bad_ids() {
        assert!(make_channel_refs("").is_err());
        assert!(make_channel_refs("a/b").is_err());
    }

    #[test]
    fn test_target_from_path_uses_segment_parity() {
        let cases = [
            ("signaling", WriteMode::Append),
            ("signaling/U1-1000", WriteMode::Merge),
            ("signaling/U1-1000/answers", WriteMode::Append),
            ("signaling/U1-1000/answers/a1", WriteMode::Merge),
            ("a/b/c/d/e", WriteMode::Append),
            ("/liveStreams/U1-1000/", WriteMode::Merge),
        ];
        for (path, mode) in cases {
            let target = SignalTarget::from_path(path).unwrap();
            assert_eq!(target.mode(), mode, "path {}", path);
        }
        assert!(SignalTarget::from_path("").is_err());
    }

    #[test]
    fn test_stream_record_ref() {
        assert_eq!(
            stream_record_ref("U1-1000").unwrap().to_string(),
            "liveStreams/U1-1000"
        );
    }
}
