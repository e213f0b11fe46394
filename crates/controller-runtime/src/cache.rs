//! List/watch informer cache.
//!
//! The [`Informer`] keeps a local mirror of the machine records a [`Selector`]
//! covers and reports every change it applies as a [`CacheEvent`]. It is the
//! only writer of the mirror; consumers read it through a [`CacheReader`],
//! which always hands out owned clones.
//!
//! Recovery:
//! - a watch that ends cleanly is reopened from the last observed resource version
//! - a list or watch error (including an expired resume point) triggers a
//!   re-list after an exponential backoff delay, then a new watch
//!
//! Errors are logged here and never reach consumers.

use crate::backoff::ExponentialBackoff;
use crate::shutdown::{wait_for_shutdown, ShutdownSignal};
use node_client::{Machine, NodeStore, Selector, StoreError, WatchEvent};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

type Mirror = Arc<RwLock<BTreeMap<String, Machine>>>;

/// A change applied to the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// First observation of a record
    Added(Machine),
    /// A record changed, or a periodic resync (then `old == new`)
    Updated {
        /// Previously cached snapshot
        old: Machine,
        /// Snapshot now in the mirror
        new: Machine,
    },
    /// Record removed; carries the last known state
    Deleted(Machine),
}

impl CacheEvent {
    /// Name of the record the event is about.
    pub fn name(&self) -> &str {
        match self {
            Self::Added(m) | Self::Deleted(m) => &m.name,
            Self::Updated { new, .. } => &new.name,
        }
    }
}

/// Informer tuning.
#[derive(Debug, Clone)]
pub struct InformerConfig {
    /// Period of synthetic `Updated` events for every cached record; zero disables resync
    pub resync_interval: Duration,
    /// First delay before a re-list after a failure
    pub relist_backoff_base: Duration,
    /// Ceiling for the re-list delay
    pub relist_backoff_max: Duration,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(30),
            relist_backoff_base: Duration::from_secs(1),
            relist_backoff_max: Duration::from_secs(30),
        }
    }
}

fn read(mirror: &Mirror) -> RwLockReadGuard<'_, BTreeMap<String, Machine>> {
    mirror.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(mirror: &Mirror) -> RwLockWriteGuard<'_, BTreeMap<String, Machine>> {
    mirror.write().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only handle on the informer's mirror.
///
/// Cheap to clone. Every accessor returns owned data.
#[derive(Clone)]
pub struct CacheReader {
    mirror: Mirror,
    synced: watch::Receiver<bool>,
}

impl fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheReader")
            .field("len", &self.len())
            .field("synced", &self.has_synced())
            .finish()
    }
}

impl CacheReader {
    /// Cached snapshot of `name`.
    pub fn get(&self, name: &str) -> Option<Machine> {
        read(&self.mirror).get(name).cloned()
    }

    /// Every cached record, ordered by name.
    pub fn snapshot(&self) -> Vec<Machine> {
        read(&self.mirror).values().cloned().collect()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        read(&self.mirror).len()
    }

    /// The mirror holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first list has completed.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits for the first list to complete.
    ///
    /// Returns `false` if shutdown was requested first, or if the informer is gone
    /// without ever syncing.
    pub async fn wait_for_sync(&self, shutdown: &mut ShutdownSignal) -> bool {
        let mut synced = self.synced.clone();
        tokio::select! {
            result = synced.wait_for(|s| *s) => result.is_ok(),
            () = wait_for_shutdown(shutdown) => false,
        }
    }
}

/// Keeps the mirror in line with the store.
pub struct Informer {
    store: Arc<dyn NodeStore>,
    selector: Selector,
    config: InformerConfig,
    mirror: Mirror,
    synced: watch::Sender<bool>,
    events: mpsc::UnboundedSender<CacheEvent>,
}

impl fmt::Debug for Informer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Informer")
            .field("selector", &self.selector)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Informer {
    /// Creates an informer over the records `selector` covers.
    ///
    /// Returns the informer and the receiving end of its event channel.
    pub fn new(
        store: Arc<dyn NodeStore>,
        selector: Selector,
        config: InformerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<CacheEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (synced, _) = watch::channel(false);
        let informer = Self {
            store,
            selector,
            config,
            mirror: Arc::new(RwLock::new(BTreeMap::new())),
            synced,
            events,
        };
        (informer, rx)
    }

    /// Read handle on this informer's mirror.
    pub fn reader(&self) -> CacheReader {
        CacheReader {
            mirror: Arc::clone(&self.mirror),
            synced: self.synced.subscribe(),
        }
    }

    /// Runs list/watch until `shutdown` fires.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!("Starting informer for {:?}", self.selector);
        let mut backoff = ExponentialBackoff::new(
            self.config.relist_backoff_base,
            self.config.relist_backoff_max,
        );

        loop {
            match self.list_and_watch(&mut shutdown, &mut backoff).await {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_backoff();
                    warn!(
                        "Informer for {:?} lost its watch: {}. Re-listing in {:?}",
                        self.selector, e, delay
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
            }
        }

        info!("Informer for {:?} stopped", self.selector);
    }

    /// One list followed by watches until an error (`Err`) or shutdown (`Ok`).
    async fn list_and_watch(
        &self,
        shutdown: &mut ShutdownSignal,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), StoreError> {
        let list = tokio::select! {
            list = self.store.list(&self.selector) => list?,
            () = wait_for_shutdown(shutdown) => return Ok(()),
        };
        backoff.reset();

        let mut resource_version = list.resource_version;
        let count = list.items.len();
        self.replace(list.items);
        if !self.synced.send_replace(true) {
            info!(
                "Informer for {:?} synced {} records at resource version {}",
                self.selector, count, resource_version
            );
        }

        let mut resync = self.resync_timer();

        loop {
            let mut events = tokio::select! {
                events = self.store.watch(&self.selector, &resource_version) => events?,
                () = wait_for_shutdown(shutdown) => return Ok(()),
            };

            loop {
                tokio::select! {
                    () = wait_for_shutdown(shutdown) => return Ok(()),
                    () = next_tick(&mut resync) => self.resync(),
                    item = events.recv() => match item {
                        Some(Ok(event)) => {
                            if let Some(version) = self.apply(event) {
                                resource_version = version;
                            }
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            debug!(
                                "Watch for {:?} closed, reopening from {}",
                                self.selector, resource_version
                            );
                            break;
                        }
                    },
                }
            }
        }
    }

    fn resync_timer(&self) -> Option<Interval> {
        let period = self.config.resync_interval;
        if period.is_zero() {
            return None;
        }
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(interval)
    }

    /// Applies one watch event to the mirror; returns the resume point it carries.
    fn apply(&self, event: WatchEvent) -> Option<String> {
        let (version, emitted) = match event {
            WatchEvent::Added(machine) | WatchEvent::Modified(machine) => {
                let version = machine.resource_version.clone();
                let previous = write(&self.mirror).insert(machine.name.clone(), machine.clone());
                let emitted = match previous {
                    Some(old) => CacheEvent::Updated { old, new: machine },
                    None => CacheEvent::Added(machine),
                };
                (version, emitted)
            }
            WatchEvent::Deleted(machine) => {
                let version = machine.resource_version.clone();
                let last = write(&self.mirror).remove(&machine.name).unwrap_or(machine);
                (version, CacheEvent::Deleted(last))
            }
            WatchEvent::Bookmark(version) => return Some(version),
        };
        self.emit(emitted);
        (!version.is_empty()).then_some(version)
    }

    /// Swaps the mirror for a fresh list and reports the difference.
    fn replace(&self, items: Vec<Machine>) {
        let mut emitted = Vec::with_capacity(items.len());
        {
            let mut mirror = write(&self.mirror);
            let mut fresh = BTreeMap::new();
            for machine in items {
                match mirror.remove(&machine.name) {
                    Some(old) => emitted.push(CacheEvent::Updated {
                        old,
                        new: machine.clone(),
                    }),
                    None => emitted.push(CacheEvent::Added(machine.clone())),
                }
                fresh.insert(machine.name.clone(), machine);
            }
            // Whatever is left was not in the list
            for (_, gone) in std::mem::replace(&mut *mirror, fresh) {
                emitted.push(CacheEvent::Deleted(gone));
            }
        }
        for event in emitted {
            self.emit(event);
        }
    }

    fn resync(&self) {
        let snapshot: Vec<Machine> = read(&self.mirror).values().cloned().collect();
        debug!("Resyncing {} records for {:?}", snapshot.len(), self.selector);
        for machine in snapshot {
            self.emit(CacheEvent::Updated {
                old: machine.clone(),
                new: machine,
            });
        }
    }

    fn emit(&self, event: CacheEvent) {
        if self.events.send(event).is_err() {
            debug!("No consumer for cache events of {:?}", self.selector);
        }
    }
}

async fn next_tick(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use node_client::MockNodeStore;
    use tokio::time::timeout;

    fn test_config() -> InformerConfig {
        InformerConfig {
            resync_interval: Duration::ZERO,
            relist_backoff_base: Duration::from_millis(10),
            relist_backoff_max: Duration::from_millis(100),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<CacheEvent>) -> CacheEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    fn start(
        store: &MockNodeStore,
        selector: Selector,
        config: InformerConfig,
    ) -> (
        CacheReader,
        mpsc::UnboundedReceiver<CacheEvent>,
        shutdown::ShutdownTrigger,
        tokio::task::JoinHandle<()>,
    ) {
        let (informer, rx) = Informer::new(Arc::new(store.clone()), selector, config);
        let reader = informer.reader();
        let (trigger, signal) = shutdown::channel();
        let handle = tokio::spawn(informer.run(signal));
        (reader, rx, trigger, handle)
    }

    #[tokio::test]
    async fn test_initial_list_seeds_mirror() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        store.insert(Machine::new("b"));

        let (reader, mut rx, trigger, handle) = start(&store, Selector::All, test_config());
        assert!(!reader.has_synced());

        let mut names = vec![
            next_event(&mut rx).await.name().to_string(),
            next_event(&mut rx).await.name().to_string(),
        ];
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        let (_keep, mut signal) = shutdown::channel();
        assert!(reader.wait_for_sync(&mut signal).await);
        assert!(reader.has_synced());
        assert_eq!(reader.len(), 2);

        trigger.send(true).expect("informer alive");
        handle.await.expect("informer stopped cleanly");
    }

    #[tokio::test]
    async fn test_watch_events_update_mirror() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        let (reader, mut rx, _trigger, _handle) = start(&store, Selector::All, test_config());
        assert!(matches!(next_event(&mut rx).await, CacheEvent::Added(_)));

        store.set_annotation("a", "reboot-requested", "");
        match next_event(&mut rx).await {
            CacheEvent::Updated { old, new } => {
                assert!(!old.has_annotation("reboot-requested"));
                assert!(new.has_annotation("reboot-requested"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let cached = reader.get("a").expect("cached");
        assert_eq!(cached, store.get("a").expect("stored"));

        store.remove("a");
        assert!(matches!(next_event(&mut rx).await, CacheEvent::Deleted(m) if m.name == "a"));
        assert!(reader.get("a").is_none());
    }

    #[tokio::test]
    async fn test_reader_returns_owned_clones() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        let (reader, mut rx, _trigger, _handle) = start(&store, Selector::All, test_config());
        next_event(&mut rx).await;

        let mut copy = reader.get("a").expect("cached");
        copy.annotations.insert("local".to_string(), "edit".to_string());
        assert!(!reader.get("a").expect("cached").has_annotation("local"));
    }

    #[tokio::test]
    async fn test_selector_limits_mirror() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        store.insert(Machine::new("b"));
        let (reader, mut rx, _trigger, _handle) =
            start(&store, Selector::Name("b".to_string()), test_config());

        assert_eq!(next_event(&mut rx).await.name(), "b");
        store.set_annotation("a", "k", "v");
        store.set_annotation("b", "k", "v");
        assert_eq!(next_event(&mut rx).await.name(), "b");
        assert_eq!(reader.len(), 1);
    }

    #[tokio::test]
    async fn test_clean_watch_close_reopens_without_relist() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        let (reader, mut rx, _trigger, _handle) = start(&store, Selector::All, test_config());
        next_event(&mut rx).await;

        store.close_watches();
        tokio::task::yield_now().await;
        store.set_annotation("a", "k", "v");

        assert!(matches!(next_event(&mut rx).await, CacheEvent::Updated { .. }));
        assert!(reader.get("a").expect("cached").has_annotation("k"));
        assert_eq!(store.list_calls(), 1);
        assert!(store.watch_calls() >= 2);
    }

    #[tokio::test]
    async fn test_broken_watch_relists_and_reports_missed_delete() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        store.insert(Machine::new("b"));
        let (reader, mut rx, _trigger, _handle) = start(&store, Selector::All, test_config());
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        // Break the watch and change things while nobody is watching
        store.break_watches();
        store.remove("b");
        store.insert(Machine::new("c"));

        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(next_event(&mut rx).await);
        }
        assert!(seen.iter().any(|e| matches!(e, CacheEvent::Deleted(m) if m.name == "b")));
        assert!(seen.iter().any(|e| matches!(e, CacheEvent::Added(m) if m.name == "c")));
        assert!(seen.iter().any(|e| matches!(e, CacheEvent::Updated { new, .. } if new.name == "a")));

        assert_eq!(store.list_calls(), 2);
        let mut names: Vec<String> = reader.snapshot().into_iter().map(|m| m.name).collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_expired_resume_point_relists() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        let (reader, mut rx, _trigger, _handle) = start(&store, Selector::All, test_config());
        next_event(&mut rx).await;

        // The informer falls behind and the history it needs is compacted away
        store.close_watches();
        store.set_annotation("a", "reboot-now", "");
        store.compact();

        match next_event(&mut rx).await {
            CacheEvent::Updated { new, .. } => assert!(new.has_annotation("reboot-now")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(reader.get("a").expect("cached").has_annotation("reboot-now"));
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_emits_identical_updates() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("a"));
        let config = InformerConfig {
            resync_interval: Duration::from_secs(10),
            ..test_config()
        };
        let (_reader, mut rx, _trigger, _handle) = start(&store, Selector::All, config);
        next_event(&mut rx).await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        match next_event(&mut rx).await {
            CacheEvent::Updated { old, new } => assert_eq!(old, new),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_sync_gives_up_on_shutdown() {
        let store = MockNodeStore::new();
        let (informer, _rx) = Informer::new(Arc::new(store), Selector::All, test_config());
        let reader = informer.reader();
        // Informer never runs
        let (trigger, mut signal) = shutdown::channel();
        trigger.send(true).expect("receiver alive");
        assert!(!reader.wait_for_sync(&mut signal).await);
    }
}
