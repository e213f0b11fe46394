//! Controller Runtime
//!
//! The reconciliation engine shared by the reboot controller and the reboot agent:
//!
//! - [`cache`]: list+watch informer keeping a local mirror of machine records and
//!   emitting typed change events
//! - [`queue`]: deduplicating work queue with per-key exponential requeue backoff
//! - [`backoff`]: the exponential delay calculators both of the above use
//! - [`shutdown`]: process-wide stop signal
//!
//! # Example
//!
//! ```no_run
//! use controller_runtime::cache::{Informer, InformerConfig};
//! use controller_runtime::queue::WorkQueue;
//! use controller_runtime::shutdown;
//! use node_client::{KubeNodeStore, Selector};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(KubeNodeStore::new(kube::Client::try_default().await?));
//! let (informer, mut events) = Informer::new(store, Selector::All, InformerConfig::default());
//! let cache = informer.reader();
//! let (_trigger, signal) = shutdown::channel();
//! tokio::spawn(informer.run(signal));
//!
//! let queue = WorkQueue::new();
//! while let Some(event) = events.recv().await {
//!     queue.add(event.name().to_string());
//! }
//! # let _ = cache;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cache;
pub mod queue;
pub mod shutdown;

pub use backoff::{ExponentialBackoff, ItemBackoff};
pub use cache::{CacheEvent, CacheReader, Informer, InformerConfig};
pub use queue::WorkQueue;
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
