//! Document store integration tests
//!
//! Exercises the in-memory store through the `DocumentStore` trait object the
//! signaling layer uses, including the `Stream` view of live queries.

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use streamrtc_core::{
    ChangeKind, CollectionRef, Document, DocumentRef, DocumentStore, MemoryStore, StoreError,
};

fn fields(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_store_as_trait_object() {
    let memory = MemoryStore::new();
    let store: Arc<dyn DocumentStore> = Arc::new(memory.clone());

    let base = DocumentRef::new("signaling/U1-1000").unwrap();
    assert_ok!(store.set(&base, fields(json!({"isLive": true})), true).await);

    let read = store.get(&base).await.unwrap().unwrap();
    assert_eq!(read["isLive"], json!(true));

    // the clone shares state with the trait object
    assert!(memory.document("signaling/U1-1000").is_some());
}

#[tokio::test]
async fn test_subscription_stream_sees_every_append_in_order() {
    let store = MemoryStore::new();
    let candidates = CollectionRef::new("signaling/U1-1000/candidates").unwrap();
    let mut sub = store.subscribe(&candidates).await.unwrap();

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            store
                .add(&candidates, fields(json!({"n": n})))
                .await
                .unwrap(),
        );
    }

    let received: Vec<_> = timeout(Duration::from_secs(1), (&mut sub).take(5).collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(received.iter().all(|c| c.kind == ChangeKind::Added));
    assert_eq!(
        received.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
        ids
    );
}

#[tokio::test]
async fn test_read_failure_injection() {
    let store = MemoryStore::new();
    store.fail_reads_under("signaling", StoreError::unavailable("offline"));

    let base = DocumentRef::new("signaling/U1-1000").unwrap();
    let err = assert_err!(store.get(&base).await);
    assert_eq!(err.code, "unavailable");

    let coll = base.collection("answers").unwrap();
    assert_err!(store.subscribe(&coll).await);
}

#[tokio::test]
async fn test_dropped_subscription_is_pruned() {
    let store = MemoryStore::new();
    let answers = CollectionRef::new("signaling/U1-1000/answers").unwrap();

    let sub = store.subscribe(&answers).await.unwrap();
    assert_eq!(store.subscriber_count("signaling/U1-1000/answers"), 1);
    drop(sub);

    store.add(&answers, Document::new()).await.unwrap();
    assert_eq!(store.subscriber_count("signaling/U1-1000/answers"), 0);
}
