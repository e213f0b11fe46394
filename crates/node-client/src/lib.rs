//! Node Store Client
//!
//! The reboot coordinator's only view of the cluster: a versioned, watchable store
//! of machine records backed by Kubernetes `Node` objects.
//!
//! # Example
//!
//! ```no_run
//! use node_client::{KubeNodeStore, NodeStore, Selector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeNodeStore::new(client);
//!
//! // List every node and the resume point for a watch
//! let list = store.list(&Selector::All).await?;
//!
//! // Follow changes from that point on
//! let mut events = store.watch(&Selector::All, &list.resource_version).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Optimistic concurrency**: annotation updates carry the resource version they were read at
//! - **Selectors**: watch all nodes or exactly one node by name
//! - **Mocking**: `MockNodeStore` (feature `test-util`) for unit tests without a cluster

pub mod client;
pub mod error;
pub mod models;
pub mod store;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeNodeStore;
pub use error::StoreError;
pub use models::*;
pub use store::{NodeStore, WatchReceiver};
#[cfg(feature = "test-util")]
pub use mock::MockNodeStore;
