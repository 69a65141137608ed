// src/manager.rs
//! The single owner of the active locale.
//!
//! One write path fans the preference out to every mirrored storage key, one
//! read path reconciles them. Changes reach same-tab consumers through the
//! [`EventBus`] and other tabs through the store's change notification; a tab
//! applying a remote change never writes it back.
//!
//! Store writes happen outside the transition lock, since another tab on the
//! same origin may handle the resulting event synchronously on this thread.
//! Every state change is queued while that lock is held and announced from the
//! queue, so subscribers see changes in the order they were applied.

use crate::bus::{global_bus, ChangeOrigin, EventBus, LocaleChanged, Subscription};
use crate::dom::{bind_locale, DocumentRoot, DomBinder};
use crate::locale::{Direction, Locale};
use crate::settings::LocaleSettings;
use crate::store::{FileStore, MemoryStore, PersistentStore, StoreEvent, StoreSubscription};
use crate::translations::{FallbackChain, Params, TranslationTable};
use crate::utils::lock;
use crate::utils::path::{get_config_dir, get_store_path};
use once_cell::sync::OnceCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const STORE_WATCH_INTERVAL: Duration = Duration::from_millis(500);

static GLOBAL_LOCALE_MANAGER: OnceCell<LocaleStateManager> = OnceCell::new();

struct Inner {
    store: Arc<dyn PersistentStore>,
    table: Arc<TranslationTable>,
    binder: Arc<dyn DomBinder>,
    bus: EventBus,
    settings: LocaleSettings,
    chain: FallbackChain,
    current: Mutex<Locale>,
    /// Held while state and DOM change. Never held across a store write.
    transition: Mutex<()>,
    /// One local write at a time, so the store and memory agree on the last one.
    writer: Mutex<()>,
    outbox: Mutex<VecDeque<LocaleChanged>>,
    delivering: AtomicBool,
    store_subscription: Mutex<Option<StoreSubscription>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(subscription) = lock(&self.store_subscription).take() {
            subscription.cancel();
        }
    }
}

/// Clears the delivery flag even if a subscriber panics.
struct Delivering<'a>(&'a AtomicBool);

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LocaleStateManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocaleStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocaleStateManager")
            .field("locale", &self.get_locale())
            .field("storage_keys", &self.inner.settings.storage_keys)
            .finish_non_exhaustive()
    }
}

pub struct LocaleStateManagerBuilder {
    store: Option<Arc<dyn PersistentStore>>,
    table: Option<Arc<TranslationTable>>,
    binder: Option<Arc<dyn DomBinder>>,
    bus: Option<EventBus>,
    settings: LocaleSettings,
}

impl LocaleStateManagerBuilder {
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn table(mut self, table: Arc<TranslationTable>) -> Self {
        self.table = Some(table);
        self
    }

    pub fn binder(mut self, binder: Arc<dyn DomBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Broadcast on `bus` instead of [`global_bus`]. Mostly useful to isolate tests.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn settings(mut self, settings: LocaleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Read the persisted preference, bind the document and start listening to the store.
    pub fn build(self) -> LocaleStateManager {
        let settings = self.settings;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn PersistentStore>);
        let table = self
            .table
            .unwrap_or_else(|| Arc::new(TranslationTable::bundled()));
        let binder = self
            .binder
            .unwrap_or_else(|| Arc::new(DocumentRoot::new()) as Arc<dyn DomBinder>);
        let bus = self.bus.unwrap_or_else(|| global_bus().clone());

        let initial = read_preference(store.as_ref(), &settings);
        bind_locale(binder.as_ref(), initial);

        let inner = Arc::new(Inner {
            store,
            table,
            binder,
            bus,
            chain: settings.fallback_chain(),
            settings,
            current: Mutex::new(initial),
            transition: Mutex::new(()),
            writer: Mutex::new(()),
            outbox: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            store_subscription: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let subscription = inner.store.subscribe(Arc::new(move |event: &StoreEvent| {
            if let Some(inner) = weak.upgrade() {
                LocaleStateManager { inner }.handle_store_event(event);
            }
        }));
        *lock(&inner.store_subscription) = Some(subscription);

        info!(locale = %initial, dir = %initial.direction(), "Locale manager initialized");
        LocaleStateManager { inner }
    }
}

/// The mirrored keys as read in priority order.
struct StoredPreference<'a> {
    values: Vec<(&'a str, Option<String>)>,
    /// First valid value, which outranks everything read after it.
    winner: Option<Locale>,
    /// False when a read failed; later keys were not read.
    complete: bool,
}

fn read_stored<'a>(
    store: &dyn PersistentStore,
    settings: &'a LocaleSettings,
) -> StoredPreference<'a> {
    let mut stored = StoredPreference {
        values: Vec::with_capacity(settings.storage_keys.len()),
        winner: None,
        complete: true,
    };
    for key in &settings.storage_keys {
        match store.get(key) {
            Ok(value) => {
                if stored.winner.is_none() {
                    stored.winner = value.as_deref().and_then(|v| v.parse().ok());
                }
                stored.values.push((key.as_str(), value));
            }
            Err(e) => {
                debug!("Could not read storage key '{}': {}", key, e);
                stored.complete = false;
                break;
            }
        }
    }
    stored
}

/// Read every mirrored key in priority order and repair the ones that disagree.
///
/// Mirrors are only repaired after a complete read.
fn read_preference(store: &dyn PersistentStore, settings: &LocaleSettings) -> Locale {
    let stored = read_stored(store, settings);
    for (key, value) in &stored.values {
        if let Some(value) = value {
            if value.parse::<Locale>().is_err() {
                warn!("Ignoring unsupported locale {:?} stored under '{}'.", value, key);
            }
        }
    }

    let Some(locale) = stored.winner else {
        let initial = settings.initial_locale();
        if stored.complete {
            debug!("No valid persisted locale. Using '{}'.", initial);
        } else {
            warn!(
                "Persistent store unreadable. Starting non-persistent with '{}'.",
                initial
            );
        }
        return initial;
    };

    if !stored.complete {
        warn!(
            "Persistent store partly unreadable. Using '{}' and leaving mirrors as they are.",
            locale
        );
        return locale;
    }

    for (key, value) in &stored.values {
        if value.as_deref() != Some(locale.code()) {
            info!(
                "Reconciling storage key '{}' from {:?} to '{}'.",
                key, value, locale
            );
            if let Err(e) = store.set(key, locale.code()) {
                warn!("Could not reconcile storage key '{}': {}", key, e);
            }
        }
    }
    locale
}

impl LocaleStateManager {
    pub fn builder() -> LocaleStateManagerBuilder {
        LocaleStateManagerBuilder {
            store: None,
            table: None,
            binder: None,
            bus: None,
            settings: LocaleSettings::default(),
        }
    }

    pub fn get_locale(&self) -> Locale {
        *lock(&self.inner.current)
    }

    pub fn direction(&self) -> Direction {
        self.get_locale().direction()
    }

    /// Switch the active locale. Equal to the current locale is a no-op.
    ///
    /// When this returns, state and document attributes reflect `locale` (or a
    /// value another tab wrote meanwhile). Subscribers have been notified unless
    /// this runs inside a subscriber or next to another thread already
    /// notifying; that thread then delivers the change right after its own.
    pub fn set_locale(&self, locale: Locale) {
        {
            let _writer = lock(&self.inner.writer);
            if self.get_locale() == locale {
                trace!(locale = %locale, "Locale unchanged; nothing to do");
                return;
            }
            let persisted = self.persist(locale);
            self.settle(locale, ChangeOrigin::Local, persisted);
        }
        self.deliver_pending();
    }

    /// [`LocaleStateManager::set_locale`] for untyped input such as a `<select>` value.
    ///
    /// Unsupported tags are logged and ignored.
    pub fn set_locale_tag(&self, tag: &str) {
        match tag.parse::<Locale>() {
            Ok(locale) => self.set_locale(locale),
            Err(e) => warn!(current = %self.get_locale(), "Ignoring locale change: {}", e),
        }
    }

    pub fn translate(&self, key: &str) -> String {
        self.inner.table.translate(
            self.get_locale(),
            &self.inner.chain,
            key,
            None,
            self.inner.settings.log_missing_translations,
        )
    }

    pub fn translate_with(&self, key: &str, params: &Params) -> String {
        self.inner.table.translate(
            self.get_locale(),
            &self.inner.chain,
            key,
            Some(params),
            self.inner.settings.log_missing_translations,
        )
    }

    /// Called for every change, local or from another tab.
    pub fn on_locale_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LocaleChanged) + Send + Sync + 'static,
    {
        self.inner
            .bus
            .listen_typed::<LocaleChanged, F>(&self.inner.settings.broadcast_event, callback)
    }

    pub fn settings(&self) -> &LocaleSettings {
        &self.inner.settings
    }

    pub fn table(&self) -> &TranslationTable {
        &self.inner.table
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Apply `preferred`, unless the highest-priority valid value in the store
    /// says another tab wrote something newer. `trust_store` is false when our
    /// own write did not land.
    fn settle(&self, preferred: Locale, origin: ChangeOrigin, trust_store: bool) {
        let _guard = lock(&self.inner.transition);
        let stored = read_stored(self.inner.store.as_ref(), &self.inner.settings);
        let (new, origin) = match stored.winner {
            Some(stored) if trust_store && stored != preferred => {
                debug!(
                    "Storage moved on to '{}' while applying '{}'; following it.",
                    stored, preferred
                );
                (stored, ChangeOrigin::Remote)
            }
            _ => (preferred, origin),
        };
        let old = self.get_locale();
        if old == new {
            trace!(locale = %new, ?origin, "Locale unchanged; nothing to do");
            return;
        }
        *lock(&self.inner.current) = new;
        bind_locale(self.inner.binder.as_ref(), new);
        lock(&self.inner.outbox).push_back(LocaleChanged { old, new, origin });
    }

    /// Announce queued changes in order. Whoever finds delivery already running
    /// leaves its change to that thread.
    fn deliver_pending(&self) {
        loop {
            if self.inner.delivering.swap(true, Ordering::AcqRel) {
                return;
            }
            {
                let _delivering = Delivering(&self.inner.delivering);
                loop {
                    let next = lock(&self.inner.outbox).pop_front();
                    let Some(change) = next else { break };
                    self.announce(change);
                }
            }
            if lock(&self.inner.outbox).is_empty() {
                return;
            }
        }
    }

    fn announce(&self, change: LocaleChanged) {
        info!(
            old = %change.old,
            new = %change.new,
            origin = ?change.origin,
            dir = %change.new.direction(),
            "Locale changed"
        );
        self.inner
            .bus
            .emit(&self.inner.settings.broadcast_event, &change);
    }

    /// Best effort: a failed key is skipped and retried on the next change.
    ///
    /// Returns whether every key was written.
    fn persist(&self, locale: Locale) -> bool {
        let mut complete = true;
        for key in &self.inner.settings.storage_keys {
            if let Err(e) = self.inner.store.set(key, locale.code()) {
                complete = false;
                warn!(
                    "Could not persist locale '{}' under '{}': {}. Continuing in memory.",
                    locale, key, e
                );
            }
        }
        complete
    }

    /// Another handle wrote a mirrored key. The highest-priority valid value
    /// in the store wins, read fresh so late or reordered events cannot win.
    fn handle_store_event(&self, event: &StoreEvent) {
        if !self.inner.settings.is_storage_key(&event.key) {
            trace!("Ignoring store change to unrelated key '{}'.", event.key);
            return;
        }
        let Some(raw) = event.new_value.as_deref() else {
            debug!("Storage key '{}' removed elsewhere; keeping current locale.", event.key);
            return;
        };
        let locale = match raw.parse::<Locale>() {
            Ok(locale) => locale,
            Err(e) => {
                warn!("Ignoring remote change under '{}': {}", event.key, e);
                return;
            }
        };
        self.settle(locale, ChangeOrigin::Remote, true);
        self.deliver_pending();
    }
}

/// Install the process-wide manager. Later calls keep the first one and return it.
pub fn init_locale_manager(manager: LocaleStateManager) -> &'static LocaleStateManager {
    let mut fresh = Some(manager);
    let installed = GLOBAL_LOCALE_MANAGER.get_or_init(|| {
        fresh
            .take()
            .unwrap_or_else(|| LocaleStateManager::builder().build())
    });
    if fresh.is_some() {
        warn!("Global locale manager was already initialized. This call was ignored.");
    }
    installed
}

/// Build the process-wide manager from `data/config/locale.yml` and `data/store`.
///
/// Falls back to an in-memory store when the store file cannot be opened. Inside a
/// tokio runtime the store file is also watched for writes from other processes.
/// Only the first call builds anything.
pub fn init_default_locale_manager() -> &'static LocaleStateManager {
    let mut built = false;
    let installed = GLOBAL_LOCALE_MANAGER.get_or_init(|| {
        built = true;
        build_default_manager()
    });
    if !built {
        warn!("Global locale manager was already initialized. This call was ignored.");
    }
    installed
}

fn build_default_manager() -> LocaleStateManager {
    let settings = LocaleSettings::load_default_location();
    let table_path = settings
        .translations_file
        .as_deref()
        .map(|path| get_config_dir().join(path));
    let table = TranslationTable::load_or_bundled(table_path.as_deref());
    let store: Arc<dyn PersistentStore> = match FileStore::open(get_store_path()) {
        Ok(store) => {
            if tokio::runtime::Handle::try_current().is_ok() {
                let _watcher = store.watch(STORE_WATCH_INTERVAL);
            } else {
                debug!("No tokio runtime; changes from other processes will not be observed.");
            }
            store as Arc<dyn PersistentStore>
        }
        Err(e) => {
            warn!("Falling back to in-memory locale storage: {}", e);
            Arc::new(MemoryStore::new())
        }
    };
    LocaleStateManager::builder()
        .settings(settings)
        .table(Arc::new(table))
        .store(store)
        .build()
}

pub fn locale_manager() -> Option<&'static LocaleStateManager> {
    GLOBAL_LOCALE_MANAGER.get()
}
