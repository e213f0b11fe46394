//! Integration tests for the node store contract
//!
//! Exercises `MockNodeStore` through the `NodeStore` trait object, the way the
//! informer and the reconcilers use it. The kube-backed store is covered by
//! `#[ignore]` tests that need a cluster.

use node_client::{Machine, MockNodeStore, NodeStore, Selector, StoreError, WatchEvent};
use std::collections::BTreeMap;
use std::sync::Arc;

#[tokio::test]
async fn test_list_then_watch_sees_every_later_write() {
    let mock = MockNodeStore::new();
    let store: Arc<dyn NodeStore> = Arc::new(mock.clone());

    mock.insert(Machine::new("worker-1"));
    let list = store.list(&Selector::All).await.expect("list");
    assert_eq!(list.items.len(), 1);

    let mut events = store
        .watch(&Selector::All, &list.resource_version)
        .await
        .expect("watch");

    let current = mock.get("worker-1").expect("stored");
    let mut desired = current.annotations.clone();
    desired.insert("reboot-requested".to_string(), String::new());
    let updated = store
        .update_annotations(&current, &desired)
        .await
        .expect("conditional update");
    assert_ne!(updated.resource_version, current.resource_version);

    mock.remove("worker-1");

    match events.recv().await {
        Some(Ok(WatchEvent::Modified(m))) => {
            assert!(m.has_annotation("reboot-requested"));
            assert_eq!(m.resource_version, updated.resource_version);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        events.recv().await,
        Some(Ok(WatchEvent::Deleted(m))) if m.name == "worker-1"
    ));
}

#[tokio::test]
async fn test_update_of_deleted_node_is_not_found() {
    let mock = MockNodeStore::new();
    let snapshot = mock.insert(Machine::new("worker-1"));
    mock.remove("worker-1");

    let err = mock
        .update_annotations(&snapshot, &BTreeMap::new())
        .await
        .expect_err("node is gone");
    assert!(matches!(err, StoreError::NotFound(name) if name == "worker-1"));
}

#[tokio::test]
async fn test_broken_watch_reports_error_then_closes() {
    let mock = MockNodeStore::new();
    mock.insert(Machine::new("worker-1"));
    let list = mock.list(&Selector::All).await.expect("list");
    let mut events = mock
        .watch(&Selector::All, &list.resource_version)
        .await
        .expect("watch");

    mock.break_watches();
    let err = events.recv().await.expect("error item").expect_err("transport error");
    assert!(err.is_retryable());
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_only_one_of_two_racing_writers_wins() {
    let mock = MockNodeStore::new();
    let snapshot = mock.insert(Machine::new("worker-1"));

    let mut first = snapshot.annotations.clone();
    first.insert("reboot-now".to_string(), String::new());
    let mut second = snapshot.annotations.clone();
    second.insert("reboot-in-progress".to_string(), String::new());

    let a = mock.update_annotations(&snapshot, &first).await;
    let b = mock.update_annotations(&snapshot, &second).await;

    assert!(a.is_ok());
    assert!(b.expect_err("stale writer").is_conflict());
    let stored = mock.get("worker-1").expect("stored");
    assert!(stored.has_annotation("reboot-now"));
    assert!(!stored.has_annotation("reboot-in-progress"));
}
