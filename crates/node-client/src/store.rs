//! NodeStore trait for mocking
//!
//! This trait abstracts the node store so reconcilers and the informer can run
//! against `KubeNodeStore` in production and `MockNodeStore` in unit tests.

use crate::error::StoreError;
use crate::models::{Machine, NodeList, Selector, WatchEvent};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Channel a watch delivers its events on. A closed channel means the watch ended.
pub type WatchReceiver = mpsc::Receiver<Result<WatchEvent, StoreError>>;

/// Trait for node store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NodeStore: Send + Sync {
    /// Lists the records covered by `selector` and returns the watch resume point.
    async fn list(&self, selector: &Selector) -> Result<NodeList, StoreError>;

    /// Starts a watch from `resource_version`.
    ///
    /// Events arrive in the order the store produced them. An `Err` item or a
    /// closed channel ends the watch; the caller decides whether to re-list.
    async fn watch(
        &self,
        selector: &Selector,
        resource_version: &str,
    ) -> Result<WatchReceiver, StoreError>;

    /// Replaces the annotations of `machine` with `desired`, conditioned on
    /// `machine.resource_version`.
    ///
    /// `machine` is the snapshot the caller read and is never modified; keys it
    /// carries that are missing from `desired` are removed. Fails with
    /// [`StoreError::Conflict`] if the record changed since that snapshot was read.
    /// Returns the record as stored after the update.
    async fn update_annotations(
        &self,
        machine: &Machine,
        desired: &BTreeMap<String, String>,
    ) -> Result<Machine, StoreError>;
}
