//! Kubernetes-backed node store
//!
//! Lists and watches `Node` objects through `kube::Api<Node>` and performs
//! annotation updates as JSON merge patches that carry `metadata.resourceVersion`,
//! which makes the API server reject them with 409 when the node moved on.

use crate::error::StoreError;
use crate::models::{Machine, NodeList, Selector, WatchEvent};
use crate::store::{NodeStore, WatchReceiver};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::api::{ListParams, Patch, PatchParams, WatchParams};
use kube::{Api, Client};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Buffered watch events per watch before the forwarding task waits.
const WATCH_CHANNEL_CAPACITY: usize = 256;

/// Server-side timeout for a single watch request, in seconds.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Node store talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeNodeStore {
    api: Api<Node>,
}

impl std::fmt::Debug for KubeNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNodeStore").finish_non_exhaustive()
    }
}

impl KubeNodeStore {
    /// Create a new store over all nodes of the cluster `client` points at
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

/// Builds the merge patch that turns `current` into `desired`.
///
/// Removed keys are sent as `null`. The resource version makes the patch
/// conditional.
pub(crate) fn annotation_patch(
    current: &Machine,
    desired: &BTreeMap<String, String>,
) -> Value {
    let mut annotations = Map::new();
    for (key, value) in desired {
        if current.annotations.get(key) != Some(value) {
            annotations.insert(key.clone(), Value::String(value.clone()));
        }
    }
    for key in current.annotations.keys() {
        if !desired.contains_key(key) {
            annotations.insert(key.clone(), Value::Null);
        }
    }

    json!({
        "metadata": {
            "resourceVersion": current.resource_version,
            "annotations": annotations,
        }
    })
}

fn convert_event(event: kube::core::WatchEvent<Node>) -> Option<Result<WatchEvent, StoreError>> {
    let converted = match event {
        kube::core::WatchEvent::Added(node) => Machine::try_from(node).map(WatchEvent::Added),
        kube::core::WatchEvent::Modified(node) => Machine::try_from(node).map(WatchEvent::Modified),
        kube::core::WatchEvent::Deleted(node) => Machine::try_from(node).map(WatchEvent::Deleted),
        kube::core::WatchEvent::Bookmark(bookmark) => {
            Ok(WatchEvent::Bookmark(bookmark.metadata.resource_version))
        }
        kube::core::WatchEvent::Error(response) if response.code == 410 => {
            return Some(Err(StoreError::Expired(response.message.clone())));
        }
        kube::core::WatchEvent::Error(response) => {
            return Some(Err(StoreError::Transport(format!(
                "watch error {}: {}",
                response.code, response.message
            ))));
        }
    };

    match converted {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            // A record we cannot read is skipped; the rest of the stream is fine.
            warn!("Skipping malformed node in watch stream: {}", e);
            None
        }
    }
}

/// Forwards a kube watch stream onto `tx` until the stream ends, an error was
/// forwarded, or the receiver is dropped.
async fn forward_events<S>(stream: S, tx: mpsc::Sender<Result<WatchEvent, StoreError>>)
where
    S: Stream<Item = Result<kube::core::WatchEvent<Node>, kube::Error>>,
{
    futures::pin_mut!(stream);

    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            () = tx.closed() => {
                debug!("Watch receiver dropped, closing watch");
                break;
            }
        };
        let Some(item) = item else { break };

        let forwarded = match item {
            Ok(event) => match convert_event(event) {
                Some(converted) => converted,
                None => continue,
            },
            Err(e) => Err(StoreError::from_kube(e, "<watch>")),
        };
        let is_err = forwarded.is_err();
        if tx.send(forwarded).await.is_err() || is_err {
            break;
        }
    }
}

#[async_trait::async_trait]
impl NodeStore for KubeNodeStore {
    async fn list(&self, selector: &Selector) -> Result<NodeList, StoreError> {
        let mut lp = ListParams::default();
        if let Some(fields) = selector.field_selector() {
            lp = lp.fields(&fields);
        }

        let list = self.api.list(&lp).await.map_err(StoreError::Kube)?;
        let resource_version = list.metadata.resource_version.clone().unwrap_or_default();

        let mut items = Vec::with_capacity(list.items.len());
        for node in list.items {
            match Machine::try_from(node) {
                Ok(machine) => items.push(machine),
                Err(e) => warn!("Skipping malformed node in list: {}", e),
            }
        }

        debug!("Listed {} nodes at resource version {}", items.len(), resource_version);
        Ok(NodeList {
            items,
            resource_version,
        })
    }

    async fn watch(
        &self,
        selector: &Selector,
        resource_version: &str,
    ) -> Result<WatchReceiver, StoreError> {
        let mut wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        if let Some(fields) = selector.field_selector() {
            wp = wp.fields(&fields);
        }

        let api = self.api.clone();
        let version = resource_version.to_string();
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);

        // The kube stream borrows its request parameters, so it lives in its own task
        // and is forwarded over the channel.
        tokio::spawn(async move {
            let stream = match api.watch(&wp, &version).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(StoreError::from_kube(e, "<watch>"))).await;
                    return;
                }
            };
            forward_events(stream, tx).await;
        });

        Ok(rx)
    }

    async fn update_annotations(
        &self,
        machine: &Machine,
        desired: &BTreeMap<String, String>,
    ) -> Result<Machine, StoreError> {
        let patch = annotation_patch(machine, desired);
        debug!("Patching node {} annotations: {}", machine.name, patch);

        let node = self
            .api
            .patch(&machine.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &machine.name))?;

        Machine::try_from(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_patch_sets_and_removes() {
        let current = Machine {
            resource_version: "7".to_string(),
            ..Machine::new("worker-1")
        }
        .with_annotation("reboot-requested", "")
        .with_annotation("owner", "ops");

        let mut desired = current.annotations.clone();
        desired.remove("reboot-requested");
        desired.insert("reboot-now".to_string(), "2026-01-01T00:00:00Z".to_string());

        let patch = annotation_patch(&current, &desired);
        assert_eq!(patch["metadata"]["resourceVersion"], "7");
        assert_eq!(patch["metadata"]["annotations"]["reboot-requested"], Value::Null);
        assert_eq!(
            patch["metadata"]["annotations"]["reboot-now"],
            "2026-01-01T00:00:00Z"
        );
        // Unchanged keys are left out of the patch
        assert!(patch["metadata"]["annotations"].get("owner").is_none());
    }

    #[test]
    fn test_annotation_patch_no_changes_still_conditional() {
        let current = Machine {
            resource_version: "9".to_string(),
            ..Machine::new("worker-1")
        };
        let patch = annotation_patch(&current, &BTreeMap::new());
        assert_eq!(patch["metadata"]["resourceVersion"], "9");
        assert_eq!(patch["metadata"]["annotations"], json!({}));
    }

    #[tokio::test]
    async fn test_forwarding_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let idle = futures::stream::pending::<Result<kube::core::WatchEvent<Node>, kube::Error>>();
        let forwarder = tokio::spawn(forward_events(idle, tx));

        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(5), forwarder)
            .await
            .expect("forwarder stops without a new event")
            .expect("joined");
    }

    #[tokio::test]
    async fn test_forwarding_ends_with_stream() {
        let (tx, mut rx) = mpsc::channel(4);
        let bookmark: kube::core::WatchEvent<Node> = serde_json::from_value(json!({
            "type": "BOOKMARK",
            "object": {
                "kind": "Node",
                "apiVersion": "v1",
                "metadata": { "resourceVersion": "12" }
            }
        }))
        .expect("bookmark event");
        forward_events(futures::stream::iter(vec![Ok(bookmark)]), tx).await;

        assert!(matches!(rx.recv().await, Some(Ok(WatchEvent::Bookmark(v))) if v == "12"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires a reachable Kubernetes cluster
    async fn test_list_nodes_against_cluster() {
        let client = Client::try_default().await.expect("kube client");
        let store = KubeNodeStore::new(client);
        let list = store.list(&Selector::All).await.expect("list nodes");
        assert!(!list.resource_version.is_empty());
    }
}
