//! In-process document store
//!
//! Implements [`DocumentStore`] over a single mutex-guarded map. Live queries
//! receive changes over unbounded channels. Failure and duplicate-delivery
//! injection let callers exercise the error and idempotence paths of the
//! signaling layer.

use super::{
    is_server_timestamp, ChangeKind, CollectionRef, Document, DocumentChange, DocumentRef,
    DocumentStore, Subscription,
};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Length of generated document ids
const GENERATED_ID_LEN: usize = 20;

#[derive(Debug, Clone)]
struct FailureRule {
    prefix: String,
    error: StoreError,
}

#[derive(Debug, Default)]
struct MemoryInner {
    /// Full document path -> fields
    documents: BTreeMap<String, Document>,
    /// Collection path -> document ids in creation order
    order: HashMap<String, Vec<String>>,
    /// Collection path -> live query feeds
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<DocumentChange>>>,
    write_failures: Vec<FailureRule>,
    read_failures: Vec<FailureRule>,
    duplicate_deliveries: bool,
    writes: u64,
}

impl MemoryInner {
    fn check(rules: &[FailureRule], path: &str) -> Result<(), StoreError> {
        match rules.iter().find(|rule| path.starts_with(&rule.prefix)) {
            Some(rule) => Err(rule.error.clone()),
            None => Ok(()),
        }
    }

    fn notify(&mut self, collection: &str, change: DocumentChange) {
        let copies = if self.duplicate_deliveries { 2 } else { 1 };
        if let Some(feeds) = self.subscribers.get_mut(collection) {
            feeds.retain(|feed| (0..copies).all(|_| feed.send(change.clone()).is_ok()));
        }
    }

    fn ids_in(&self, collection: &str) -> Vec<String> {
        self.order.get(collection).cloned().unwrap_or_default()
    }
}

/// Document store kept entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write whose path starts with `prefix`
    pub fn fail_writes_under(&self, prefix: &str, error: StoreError) {
        self.inner.lock().write_failures.push(FailureRule {
            prefix: prefix.to_string(),
            error,
        });
    }

    /// Reject every read whose path starts with `prefix`
    pub fn fail_reads_under(&self, prefix: &str, error: StoreError) {
        self.inner.lock().read_failures.push(FailureRule {
            prefix: prefix.to_string(),
            error,
        });
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.write_failures.clear();
        inner.read_failures.clear();
    }

    /// Deliver every change twice to each live query
    pub fn set_duplicate_deliveries(&self, enabled: bool) {
        self.inner.lock().duplicate_deliveries = enabled;
    }

    /// Snapshot of a document by path
    pub fn document(&self, path: &str) -> Option<Document> {
        self.inner.lock().documents.get(path.trim_matches('/')).cloned()
    }

    /// Documents of a collection in creation order
    pub fn documents_in(&self, collection: &str) -> Vec<(String, Document)> {
        let collection = collection.trim_matches('/');
        let inner = self.inner.lock();
        inner
            .ids_in(collection)
            .into_iter()
            .filter_map(|id| {
                inner
                    .documents
                    .get(&format!("{}/{}", collection, id))
                    .map(|doc| (id, doc.clone()))
            })
            .collect()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Number of live queries attached to a collection
    pub fn subscriber_count(&self, collection: &str) -> usize {
        let mut inner = self.inner.lock();
        match inner.subscribers.get_mut(collection.trim_matches('/')) {
            Some(feeds) => {
                feeds.retain(|feed| !feed.is_closed());
                feeds.len()
            }
            None => 0,
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn resolve_timestamps(value: Value, now: i64) -> Value {
    match value {
        ref v if is_server_timestamp(v) => Value::from(now),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve_timestamps(v, now)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_timestamps(v, now))
                .collect(),
        ),
        other => other,
    }
}

fn resolve_document(data: Document) -> Document {
    let now = now_millis();
    data.into_iter()
        .map(|(k, v)| (k, resolve_timestamps(v, now)))
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError> {
        let path = doc.to_string();
        let inner = self.inner.lock();
        MemoryInner::check(&inner.read_failures, &path)?;
        Ok(inner.documents.get(&path).cloned())
    }

    async fn set(&self, doc: &DocumentRef, data: Document, merge: bool) -> Result<(), StoreError> {
        let path = doc.to_string();
        let collection = doc.parent().to_string();
        let data = resolve_document(data);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        MemoryInner::check(&inner.write_failures, &path)?;

        let (kind, stored) = match inner.documents.get_mut(&path) {
            Some(existing) => {
                if merge {
                    existing.extend(data);
                } else {
                    *existing = data;
                }
                (ChangeKind::Modified, existing.clone())
            }
            None => {
                inner.documents.insert(path.clone(), data.clone());
                inner
                    .order
                    .entry(collection.clone())
                    .or_default()
                    .push(doc.id().to_string());
                (ChangeKind::Added, data)
            }
        };
        inner.writes += 1;

        debug!(path = %path, merge, ?kind, "memory store set");
        inner.notify(
            &collection,
            DocumentChange {
                kind,
                id: doc.id().to_string(),
                data: stored,
            },
        );
        Ok(())
    }

    async fn add(&self, collection: &CollectionRef, data: Document) -> Result<String, StoreError> {
        let collection_path = collection.to_string();
        let data = resolve_document(data);

        let mut inner = self.inner.lock();
        MemoryInner::check(&inner.write_failures, &collection_path)?;

        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(GENERATED_ID_LEN);

        inner
            .documents
            .insert(format!("{}/{}", collection_path, id), data.clone());
        inner
            .order
            .entry(collection_path.clone())
            .or_default()
            .push(id.clone());
        inner.writes += 1;

        debug!(path = %collection_path, id = %id, "memory store add");
        inner.notify(
            &collection_path,
            DocumentChange {
                kind: ChangeKind::Added,
                id: id.clone(),
                data,
            },
        );
        Ok(id)
    }

    async fn subscribe(&self, collection: &CollectionRef) -> Result<Subscription, StoreError> {
        let collection_path = collection.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock();
        MemoryInner::check(&inner.read_failures, &collection_path)?;

        let copies = if inner.duplicate_deliveries { 2 } else { 1 };
        for id in inner.ids_in(&collection_path) {
            if let Some(data) = inner.documents.get(&format!("{}/{}", collection_path, id)) {
                for _ in 0..copies {
                    // Receiver is still in hand, so the send cannot fail
                    let _ = tx.send(DocumentChange {
                        kind: ChangeKind::Added,
                        id: id.clone(),
                        data: data.clone(),
                    });
                }
            }
        }

        inner
            .subscribers
            .entry(collection_path)
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }
}
