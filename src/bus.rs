// src/bus.rs
use crate::locale::Locale;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace};

/// Same-tab broadcast name used by the locale manager and by legacy listeners.
pub const LANGUAGE_CHANGED_EVENT: &str = "languageChanged";

static GLOBAL_BUS: OnceCell<EventBus> = OnceCell::new();

/// Process-global event target shared by everything in this tab.
pub fn global_bus() -> &'static EventBus {
    GLOBAL_BUS.get_or_init(EventBus::new)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    /// `set_locale` in this tab.
    Local,
    /// Observed through the persistent store, written by another tab.
    Remote,
}

/// Payload of [`LANGUAGE_CHANGED_EVENT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleChanged {
    pub old: Locale,
    pub new: Locale,
    pub origin: ChangeOrigin,
}

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: DashMap<String, Vec<(u64, Handler)>>,
}

/// Named publish/subscribe with JSON payloads. Clones share the same listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.inner.handlers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `payload` and hand it to every listener of `event_name`.
    ///
    /// Returns how many listeners ran.
    pub fn emit<S: Serialize>(&self, event_name: &str, payload: &S) -> usize {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to serialize payload for event '{}': {}", event_name, e);
                return 0;
            }
        };
        // Snapshot so handlers can listen/unlisten without deadlocking the map.
        let handlers: Vec<Handler> = match self.inner.handlers.get(event_name) {
            Some(entry) => entry.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => {
                trace!("No listeners for event '{}'.", event_name);
                return 0;
            }
        };
        for handler in &handlers {
            handler(&value);
        }
        handlers.len()
    }

    /// Register a raw listener.
    pub fn listen(
        &self,
        event_name: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .entry(event_name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            event_name: event_name.to_string(),
            id,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Register a listener that only sees payloads deserializing to `T`.
    pub fn listen_typed<T, F>(&self, event_name: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let name = event_name.to_string();
        self.listen(event_name, move |value| {
            match T::deserialize(value) {
                Ok(payload) => handler(&payload),
                Err(e) => debug!("Ignoring malformed '{}' payload: {}", name, e),
            }
        })
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.inner
            .handlers
            .get(event_name)
            .map_or(0, |entry| entry.len())
    }
}

fn remove_handler(inner: &BusInner, event_name: &str, id: u64) {
    let now_empty = match inner.handlers.get_mut(event_name) {
        Some(mut entry) => {
            entry.retain(|(handler_id, _)| *handler_id != id);
            entry.is_empty()
        }
        None => false,
    };
    if now_empty {
        inner
            .handlers
            .remove_if(event_name, |_, handlers| handlers.is_empty());
    }
}

/// Returned by [`EventBus::listen`]. `unsubscribe` may be called any number of times.
///
/// Dropping the handle leaves the listener registered.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    bus: Weak<BusInner>,
    event_name: String,
    id: u64,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.bus.upgrade() {
            remove_handler(&inner, &self.event_name, self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire) && self.bus.strong_count() > 0
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_name", &self.event_name)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
