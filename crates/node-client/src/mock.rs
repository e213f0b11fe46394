//! Mock NodeStore for unit testing
//!
//! An in-memory, versioned node store with the same optimistic concurrency
//! semantics as the API server. Every write bumps a global resource version and
//! is appended to an event log, so a watch started from a list's resume point
//! sees exactly the writes that happened after that list.
//!
//! Failure injection helpers let tests break watches, expire resume points and
//! fail updates.

use crate::error::StoreError;
use crate::models::{Machine, NodeList, Selector, WatchEvent};
use crate::store::{NodeStore, WatchReceiver};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

const MOCK_WATCH_CAPACITY: usize = 1024;

#[derive(Default)]
struct MockState {
    nodes: BTreeMap<String, Machine>,
    version: u64,
    log: Vec<(u64, WatchEvent)>,
    compacted_below: u64,
    watchers: Vec<(Selector, mpsc::Sender<Result<WatchEvent, StoreError>>)>,
    failing_updates: usize,
    update_calls: usize,
    list_calls: usize,
    watch_calls: usize,
}

impl MockState {
    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn emit(&mut self, version: u64, event: WatchEvent) {
        let name = match &event {
            WatchEvent::Added(m) | WatchEvent::Modified(m) | WatchEvent::Deleted(m) => {
                Some(m.name.clone())
            }
            WatchEvent::Bookmark(_) => None,
        };
        self.watchers.retain(|(selector, tx)| {
            if name.as_deref().is_some_and(|n| !selector.matches(n)) {
                return !tx.is_closed();
            }
            tx.try_send(Ok(event.clone())).is_ok()
        });
        self.log.push((version, event));
    }

    fn write(&mut self, mut machine: Machine) -> Machine {
        let version = self.bump();
        machine.resource_version = version.to_string();
        let event = if self.nodes.contains_key(&machine.name) {
            WatchEvent::Modified(machine.clone())
        } else {
            WatchEvent::Added(machine.clone())
        };
        self.nodes.insert(machine.name.clone(), machine.clone());
        self.emit(version, event);
        machine
    }
}

/// Mock node store for testing
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone, Default)]
pub struct MockNodeStore {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNodeStore").finish_non_exhaustive()
    }
}

impl MockNodeStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock node store lock poisoned")
    }

    /// Create or overwrite a node, as the cluster platform would (for test setup)
    ///
    /// Returns the stored record with its new resource version.
    pub fn insert(&self, machine: Machine) -> Machine {
        self.state().write(machine)
    }

    /// Set an annotation unconditionally, as an external actor would
    pub fn set_annotation(&self, name: &str, key: &str, value: &str) -> Option<Machine> {
        let mut state = self.state();
        let mut machine = state.nodes.get(name)?.clone();
        machine.annotations.insert(key.to_string(), value.to_string());
        Some(state.write(machine))
    }

    /// Remove an annotation unconditionally
    pub fn remove_annotation(&self, name: &str, key: &str) -> Option<Machine> {
        let mut state = self.state();
        let mut machine = state.nodes.get(name)?.clone();
        machine.annotations.remove(key);
        Some(state.write(machine))
    }

    /// Change the node's `Ready` condition
    pub fn set_ready(&self, name: &str, ready: Option<bool>) -> Option<Machine> {
        let mut state = self.state();
        let mut machine = state.nodes.get(name)?.clone();
        machine.ready = ready;
        Some(state.write(machine))
    }

    /// Delete a node
    pub fn remove(&self, name: &str) -> Option<Machine> {
        let mut state = self.state();
        let mut machine = state.nodes.remove(name)?;
        let version = state.bump();
        machine.resource_version = version.to_string();
        state.emit(version, WatchEvent::Deleted(machine.clone()));
        Some(machine)
    }

    /// Current stored record
    pub fn get(&self, name: &str) -> Option<Machine> {
        self.state().nodes.get(name).cloned()
    }

    /// Make the next `count` update calls fail with a transport error
    pub fn fail_next_updates(&self, count: usize) {
        self.state().failing_updates = count;
    }

    /// Break every open watch with a transport error
    pub fn break_watches(&self) {
        let watchers = std::mem::take(&mut self.state().watchers);
        for (_, tx) in watchers {
            let _ = tx.try_send(Err(StoreError::Transport("watch connection reset".to_string())));
        }
    }

    /// Close every open watch cleanly, as a server-side watch timeout would
    pub fn close_watches(&self) {
        self.state().watchers.clear();
    }

    /// Forget history so watches from older resume points fail with `Expired`
    pub fn compact(&self) {
        let mut state = self.state();
        state.compacted_below = state.version;
        state.log.clear();
    }

    /// Number of `update_annotations` calls so far, successful or not
    pub fn update_calls(&self) -> usize {
        self.state().update_calls
    }

    /// Number of `list` calls so far
    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    /// Number of `watch` calls so far
    pub fn watch_calls(&self) -> usize {
        self.state().watch_calls
    }
}

#[async_trait::async_trait]
impl NodeStore for MockNodeStore {
    async fn list(&self, selector: &Selector) -> Result<NodeList, StoreError> {
        let mut state = self.state();
        state.list_calls += 1;
        let items = state
            .nodes
            .values()
            .filter(|m| selector.matches(&m.name))
            .cloned()
            .collect();
        Ok(NodeList {
            items,
            resource_version: state.version.to_string(),
        })
    }

    async fn watch(
        &self,
        selector: &Selector,
        resource_version: &str,
    ) -> Result<WatchReceiver, StoreError> {
        let mut state = self.state();
        state.watch_calls += 1;

        let from: u64 = resource_version
            .parse()
            .map_err(|_| StoreError::Expired(format!("unparseable resource version {resource_version:?}")))?;
        if from < state.compacted_below {
            return Err(StoreError::Expired(format!(
                "resource version {from} is older than {}",
                state.compacted_below
            )));
        }

        let (tx, rx) = mpsc::channel(MOCK_WATCH_CAPACITY);
        for (version, event) in &state.log {
            if *version <= from {
                continue;
            }
            let covered = match event {
                WatchEvent::Added(m) | WatchEvent::Modified(m) | WatchEvent::Deleted(m) => {
                    selector.matches(&m.name)
                }
                WatchEvent::Bookmark(_) => true,
            };
            if covered {
                let _ = tx.try_send(Ok(event.clone()));
            }
        }
        state.watchers.push((selector.clone(), tx));
        Ok(rx)
    }

    async fn update_annotations(
        &self,
        machine: &Machine,
        desired: &BTreeMap<String, String>,
    ) -> Result<Machine, StoreError> {
        let mut state = self.state();
        state.update_calls += 1;

        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return Err(StoreError::Transport("injected update failure".to_string()));
        }

        let stored = state
            .nodes
            .get(&machine.name)
            .ok_or_else(|| StoreError::NotFound(machine.name.clone()))?;
        if stored.resource_version != machine.resource_version {
            return Err(StoreError::Conflict(machine.name.clone()));
        }

        let mut updated = stored.clone();
        updated.annotations = desired.clone();
        Ok(state.write(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conditional_update_detects_stale_version() {
        let store = MockNodeStore::new();
        let original = store.insert(Machine::new("a"));

        // Someone else writes first
        store.set_annotation("a", "reboot-requested", "");

        let mut desired = original.annotations.clone();
        desired.insert("reboot-now".to_string(), String::new());
        let err = store
            .update_annotations(&original, &desired)
            .await
            .expect_err("stale version must conflict");
        assert!(err.is_conflict());

        // Re-reading gives a version that succeeds
        let fresh = store.get("a").expect("node exists");
        let updated = store
            .update_annotations(&fresh, &desired)
            .await
            .expect("fresh version succeeds");
        assert!(updated.has_annotation("reboot-now"));
        assert!(!updated.has_annotation("reboot-requested"));
    }

    #[tokio::test]
    async fn test_watch_replays_writes_after_resume_point() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        let list = store.list(&Selector::All).await.expect("list");

        store.insert(Machine::new("b"));
        let mut rx = store.watch(&Selector::All, &list.resource_version).await.expect("watch");
        store.set_annotation("a", "k", "v");

        match rx.recv().await {
            Some(Ok(WatchEvent::Added(m))) => assert_eq!(m.name, "b"),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await {
            Some(Ok(WatchEvent::Modified(m))) => assert_eq!(m.name, "a"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_respects_selector() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        store.insert(Machine::new("b"));
        let list = store.list(&Selector::Name("b".to_string())).await.expect("list");
        assert_eq!(list.items.len(), 1);

        let mut rx = store
            .watch(&Selector::Name("b".to_string()), &list.resource_version)
            .await
            .expect("watch");
        store.set_annotation("a", "k", "v");
        store.set_annotation("b", "k", "v");

        match rx.recv().await {
            Some(Ok(WatchEvent::Modified(m))) => assert_eq!(m.name, "b"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_compacted_resume_point_expires() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        store.insert(Machine::new("b"));
        store.compact();
        let err = store.watch(&Selector::All, "1").await.expect_err("expired");
        assert!(matches!(err, StoreError::Expired(_)));
    }

    #[tokio::test]
    async fn test_injected_update_failures() {
        let store = MockNodeStore::new();
        let a = store.insert(Machine::new("a"));
        store.fail_next_updates(1);
        assert!(matches!(
            store.update_annotations(&a, &BTreeMap::new()).await,
            Err(StoreError::Transport(_))
        ));
        assert!(store.update_annotations(&a, &BTreeMap::new()).await.is_ok());
        assert_eq!(store.update_calls(), 2);
    }
}
