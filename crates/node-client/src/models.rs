//! Machine record models
//!
//! `Machine` is the trimmed-down view of a Kubernetes `Node` the reboot
//! coordinator works with: identity, readiness, annotations and the version
//! token needed for conditional updates.

use crate::error::StoreError;
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of a machine record as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Unique node name
    pub name: String,

    /// Version token the snapshot was read at
    pub resource_version: String,

    /// `Ready` condition: `Some(false)` only when the node reports `Ready=False`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    /// Node annotations, the coordination channel
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Machine {
    /// Creates a ready machine with no annotations and an empty version token.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_version: String::new(),
            ready: Some(true),
            annotations: BTreeMap::new(),
        }
    }

    /// Builder-style readiness override.
    #[must_use]
    pub fn with_ready(mut self, ready: Option<bool>) -> Self {
        self.ready = ready;
        self
    }

    /// Builder-style annotation insert.
    #[must_use]
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    /// Returns true if `key` is present, whatever its value.
    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }

    /// The node explicitly reports `Ready=False`.
    pub fn is_not_ready(&self) -> bool {
        self.ready == Some(false)
    }
}

impl TryFrom<Node> for Machine {
    type Error = StoreError;

    fn try_from(node: Node) -> Result<Self, Self::Error> {
        let name = node
            .metadata
            .name
            .ok_or_else(|| StoreError::Malformed("node without metadata.name".to_string()))?;
        let resource_version = node.metadata.resource_version.ok_or_else(|| {
            StoreError::Malformed(format!("node {name} has no metadata.resourceVersion"))
        })?;

        let ready = node
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
            .and_then(|condition| match condition.status.as_str() {
                "True" => Some(true),
                "False" => Some(false),
                _ => None,
            });

        Ok(Self {
            name,
            resource_version,
            ready,
            annotations: node.metadata.annotations.unwrap_or_default(),
        })
    }
}

/// Result of a list call: the records plus the resume point for a watch.
#[derive(Debug, Clone, Default)]
pub struct NodeList {
    /// Records matching the selector
    pub items: Vec<Machine>,
    /// Version token to start a watch from
    pub resource_version: String,
}

/// A change delivered by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Record created
    Added(Machine),
    /// Record changed
    Modified(Machine),
    /// Record removed; carries the last known state
    Deleted(Machine),
    /// Progress marker: no record changed but the resume point moved
    Bookmark(String),
}

/// Which records a list or watch covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Every node in the cluster
    All,
    /// Exactly one node, by name
    Name(String),
}

impl Selector {
    /// Returns true if the selector covers a node named `name`.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Name(selected) => selected == name,
        }
    }

    /// Kubernetes field selector for this selector, if any.
    pub fn field_selector(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Name(name) => Some(format!("metadata.name={name}")),
        }
    }
}
