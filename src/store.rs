// src/store.rs
//! Durable per-origin key/value storage shared by every tab of the same origin.
//!
//! Change notifications follow browser `storage` event semantics: a write is
//! reported to every *other* handle on the origin, never to the handle that
//! made it, and only when the stored value actually changed.

use crate::utils::file::{read_if_exists, write_atomic};
use crate::utils::lock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persistent store is unavailable")]
    Unavailable,
    #[error("persistent store quota exceeded while writing {key:?}")]
    QuotaExceeded { key: String },
    #[error("persistent store holds malformed data: {0}")]
    Malformed(String),
    #[error("persistent store backend failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

/// A change made to the store by some other handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

pub type StoreListener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Register for changes made through other handles on the same origin.
    fn subscribe(&self, listener: StoreListener) -> StoreSubscription;
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, StoreListener)>>,
}

impl ListenerRegistry {
    fn add(self: &Arc<Self>, listener: StoreListener) -> StoreSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, listener));
        StoreSubscription {
            registry: Arc::downgrade(self),
            id,
            cancelled: AtomicBool::new(false),
        }
    }

    fn remove(&self, id: u64) {
        lock(&self.listeners).retain(|(listener_id, _)| *listener_id != id);
    }

    fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn dispatch(&self, event: &StoreEvent) {
        // Listeners run without the registry lock held so they may (un)subscribe.
        let snapshot: Vec<StoreListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

/// Handle returned by [`PersistentStore::subscribe`]. Cancelling is idempotent.
#[must_use = "keep the subscription to be able to cancel it"]
pub struct StoreSubscription {
    registry: Weak<ListenerRegistry>,
    id: u64,
    cancelled: AtomicBool,
}

impl StoreSubscription {
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for StoreSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSubscription")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// In-memory origin
// ---------------------------------------------------------------------------

struct Origin {
    data: Mutex<HashMap<String, String>>,
    tabs: Mutex<Vec<(u64, Weak<ListenerRegistry>)>>,
    next_tab: AtomicU64,
    available: AtomicBool,
    quota_bytes: Mutex<Option<usize>>,
    writes: AtomicU64,
}

/// One tab's view of an in-memory origin. [`MemoryStore::attach`] opens another tab.
pub struct MemoryStore {
    origin: Arc<Origin>,
    tab_id: u64,
    listeners: Arc<ListenerRegistry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let origin = Arc::new(Origin {
            data: Mutex::new(HashMap::new()),
            tabs: Mutex::new(Vec::new()),
            next_tab: AtomicU64::new(0),
            available: AtomicBool::new(true),
            quota_bytes: Mutex::new(None),
            writes: AtomicU64::new(0),
        });
        Self::join(origin)
    }

    fn join(origin: Arc<Origin>) -> Self {
        let tab_id = origin.next_tab.fetch_add(1, Ordering::Relaxed);
        let listeners = Arc::new(ListenerRegistry::default());
        lock(&origin.tabs).push((tab_id, Arc::downgrade(&listeners)));
        Self {
            origin,
            tab_id,
            listeners,
        }
    }

    /// Open another tab on the same origin.
    pub fn attach(&self) -> Self {
        Self::join(Arc::clone(&self.origin))
    }

    /// Toggle availability for the whole origin, as a privacy mode would.
    pub fn set_available(&self, available: bool) {
        self.origin.available.store(available, Ordering::Release);
    }

    /// Limit the summed byte length of all keys and values. `None` lifts the limit.
    pub fn set_quota(&self, bytes: Option<usize>) {
        *lock(&self.origin.quota_bytes) = bytes;
    }

    /// Successful writes (including removals) across the origin.
    pub fn write_count(&self) -> u64 {
        self.origin.writes.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Write without notifying anybody, as if the value had been left by an
    /// earlier session.
    pub fn seed(&self, key: &str, value: &str) {
        lock(&self.origin.data).insert(key.to_string(), value.to_string());
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.origin.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn broadcast(&self, event: StoreEvent) {
        let others: Vec<Arc<ListenerRegistry>> = {
            let mut tabs = lock(&self.origin.tabs);
            tabs.retain(|(_, registry)| registry.strong_count() > 0);
            tabs.iter()
                .filter(|(id, _)| *id != self.tab_id)
                .filter_map(|(_, registry)| registry.upgrade())
                .collect()
        };
        for registry in others {
            registry.dispatch(&event);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        lock(&self.origin.tabs).retain(|(id, _)| *id != self.tab_id);
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        Ok(lock(&self.origin.data).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_available()?;
        {
            let mut data = lock(&self.origin.data);
            if data.get(key).map(String::as_str) == Some(value) {
                self.origin.writes.fetch_add(1, Ordering::AcqRel);
                return Ok(());
            }
            if let Some(limit) = *lock(&self.origin.quota_bytes) {
                let used: usize = data
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if used + key.len() + value.len() > limit {
                    return Err(StoreError::QuotaExceeded {
                        key: key.to_string(),
                    });
                }
            }
            data.insert(key.to_string(), value.to_string());
            self.origin.writes.fetch_add(1, Ordering::AcqRel);
        }
        self.broadcast(StoreEvent {
            key: key.to_string(),
            new_value: Some(value.to_string()),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let existed = lock(&self.origin.data).remove(key).is_some();
        if existed {
            self.origin.writes.fetch_add(1, Ordering::AcqRel);
            self.broadcast(StoreEvent {
                key: key.to_string(),
                new_value: None,
            });
        }
        Ok(())
    }

    fn subscribe(&self, listener: StoreListener) -> StoreSubscription {
        self.listeners.add(listener)
    }
}

// ---------------------------------------------------------------------------
// JSON file shared between processes
// ---------------------------------------------------------------------------

/// A JSON object on disk. Each process opening the same path acts as one tab.
///
/// Changes written by other processes are only observed while [`FileStore::watch`] runs.
pub struct FileStore {
    path: PathBuf,
    /// Last content this handle wrote or observed. Diffed by the watcher.
    snapshot: Mutex<HashMap<String, String>>,
    listeners: Arc<ListenerRegistry>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>, StoreError> {
        let path = path.into();
        let snapshot = load_map(&path)?;
        info!(
            "Opened file store at {:?} with {} key(s)",
            path,
            snapshot.len()
        );
        Ok(Arc::new(Self {
            path,
            snapshot: Mutex::new(snapshot),
            listeners: Arc::new(ListenerRegistry::default()),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Poll the file for changes made by other processes and notify listeners.
    ///
    /// Must be called inside a tokio runtime. The task stops once the store is dropped.
    pub fn watch(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        info!("Watching {:?} for external changes every {:?}.", self.path, period);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    debug!("File store dropped; stopping watcher.");
                    break;
                };
                store.poll_changes();
            }
        })
    }

    /// Re-read the file once and report keys that differ from the snapshot.
    pub fn poll_changes(&self) -> usize {
        let current = match load_map(&self.path) {
            Ok(map) => map,
            Err(e) => {
                warn!("Skipping change detection for {:?}: {}", self.path, e);
                return 0;
            }
        };
        let events = {
            let mut snapshot = lock(&self.snapshot);
            let events = diff_maps(&snapshot, &current);
            *snapshot = current;
            events
        };
        for event in &events {
            debug!("External change to '{}' in {:?}", event.key, self.path);
            self.listeners.dispatch(event);
        }
        events.len()
    }

    fn modify(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StoreError> {
        let mut snapshot = lock(&self.snapshot);
        let mut map = load_map(&self.path)?;
        // Changes from other processes are left for the watcher to report.
        let pending = diff_maps(&snapshot, &map);
        let before = map.clone();
        apply(&mut map);
        let content = serde_json::to_string_pretty(&map)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        write_atomic(&self.path, &content)?;
        let touched: Vec<String> = diff_maps(&before, &map)
            .into_iter()
            .map(|event| event.key)
            .collect();
        let mut next = map;
        for event in pending.into_iter().filter(|e| !touched.contains(&e.key)) {
            match snapshot.get(&event.key) {
                Some(old) => next.insert(event.key, old.clone()),
                None => next.remove(&event.key),
            };
        }
        *snapshot = next;
        Ok(())
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(load_map(&self.path)?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.modify(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.modify(|map| {
            map.remove(key);
        })
    }

    fn subscribe(&self, listener: StoreListener) -> StoreSubscription {
        self.listeners.add(listener)
    }
}

fn load_map(path: &Path) -> Result<HashMap<String, String>, StoreError> {
    match read_if_exists(path)? {
        None => Ok(HashMap::new()),
        Some(content) if content.trim().is_empty() => Ok(HashMap::new()),
        Some(content) => serde_json::from_str(&content).map_err(|e| {
            error!("Failed to parse store file {:?}: {}", path, e);
            StoreError::Malformed(e.to_string())
        }),
    }
}

fn diff_maps(old: &HashMap<String, String>, new: &HashMap<String, String>) -> Vec<StoreEvent> {
    let mut events: Vec<StoreEvent> = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(key, value)| StoreEvent {
            key: key.clone(),
            new_value: Some(value.clone()),
        })
        .collect();
    events.extend(
        old.keys()
            .filter(|key| !new.contains_key(*key))
            .map(|key| StoreEvent {
                key: key.clone(),
                new_value: None,
            }),
    );
    events.sort_by(|a, b| a.key.cmp(&b.key));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (StoreListener, Arc<Mutex<Vec<StoreEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: StoreListener = Arc::new(move |event: &StoreEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        (listener, seen)
    }

    #[test]
    fn memory_tabs_share_data() {
        let a = MemoryStore::new();
        let b = a.attach();
        a.set("language", "en").unwrap();
        assert_eq!(b.get("language").unwrap().as_deref(), Some("en"));
    }

    #[test]
    fn memory_notifies_other_tabs_only() {
        let a = MemoryStore::new();
        let b = a.attach();
        let (la, seen_a) = recorder();
        let (lb, seen_b) = recorder();
        let _sa = a.subscribe(la);
        let _sb = b.subscribe(lb);

        a.set("language", "fr").unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(
            *seen_b.lock().unwrap(),
            vec![StoreEvent {
                key: "language".into(),
                new_value: Some("fr".into())
            }]
        );
    }

    #[test]
    fn memory_same_value_does_not_notify() {
        let a = MemoryStore::new();
        let b = a.attach();
        let (lb, seen_b) = recorder();
        let _sb = b.subscribe(lb);
        a.set("k", "v").unwrap();
        a.set("k", "v").unwrap();
        assert_eq!(seen_b.lock().unwrap().len(), 1);
        assert_eq!(a.write_count(), 2);
    }

    #[test]
    fn memory_remove_notifies_with_none() {
        let a = MemoryStore::new();
        let b = a.attach();
        a.set("k", "v").unwrap();
        let (lb, seen_b) = recorder();
        let _sb = b.subscribe(lb);
        a.remove("k").unwrap();
        a.remove("k").unwrap();
        assert_eq!(
            *seen_b.lock().unwrap(),
            vec![StoreEvent {
                key: "k".into(),
                new_value: None
            }]
        );
    }

    #[test]
    fn cancelled_subscription_stops_events_and_is_idempotent() {
        let a = MemoryStore::new();
        let b = a.attach();
        let (lb, seen_b) = recorder();
        let sub = b.subscribe(lb);
        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());
        assert_eq!(b.listener_count(), 0);
        a.set("k", "v").unwrap();
        assert!(seen_b.lock().unwrap().is_empty());
    }

    #[test]
    fn unavailable_store_fails_reads_and_writes() {
        let a = MemoryStore::new();
        a.set_available(false);
        assert!(matches!(a.get("k"), Err(StoreError::Unavailable)));
        assert!(matches!(a.set("k", "v"), Err(StoreError::Unavailable)));
        a.set_available(true);
        a.set("k", "v").unwrap();
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let a = MemoryStore::new();
        a.set_quota(Some(8));
        a.set("k", "1234").unwrap();
        assert!(matches!(
            a.set("other", "1234"),
            Err(StoreError::QuotaExceeded { .. })
        ));
        // Overwriting an existing key only counts the new value.
        a.set("k", "1234567").unwrap();
    }

    #[test]
    fn dropped_tab_is_forgotten() {
        let a = MemoryStore::new();
        let b = a.attach();
        let (lb, seen_b) = recorder();
        let _sb = b.subscribe(lb);
        drop(b);
        a.set("k", "v").unwrap();
        assert!(seen_b.lock().unwrap().is_empty());
    }

    #[test]
    fn file_store_round_trips_and_hides_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        let store = FileStore::open(&path).unwrap();
        store.set("language", "de").unwrap();
        assert_eq!(store.get("language").unwrap().as_deref(), Some("de"));
        assert_eq!(store.poll_changes(), 0);
    }

    #[test]
    fn file_store_reports_external_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        let ours = FileStore::open(&path).unwrap();
        let theirs = FileStore::open(&path).unwrap();
        let (listener, seen) = recorder();
        let _sub = ours.subscribe(listener);

        theirs.set("language", "es").unwrap();
        assert_eq!(ours.poll_changes(), 1);
        assert_eq!(
            seen.lock().unwrap()[0],
            StoreEvent {
                key: "language".into(),
                new_value: Some("es".into())
            }
        );
    }

    #[test]
    fn file_store_keeps_foreign_changes_pending_across_own_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        let ours = FileStore::open(&path).unwrap();
        let theirs = FileStore::open(&path).unwrap();
        theirs.set("language", "it").unwrap();
        ours.set("other", "x").unwrap();
        let (listener, seen) = recorder();
        let _sub = ours.subscribe(listener);
        assert_eq!(ours.poll_changes(), 1);
        assert_eq!(seen.lock().unwrap()[0].key, "language");
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn watcher_delivers_external_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        let ours = FileStore::open(&path).unwrap();
        let theirs = FileStore::open(&path).unwrap();
        let (listener, seen) = recorder();
        let _sub = ours.subscribe(listener);
        let handle = ours.watch(Duration::from_millis(10));

        theirs.set("language", "tr").unwrap();
        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().unwrap()[0].new_value.as_deref(), Some("tr"));

        drop(ours);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
