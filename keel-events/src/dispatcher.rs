//! Event dispatcher implementation

use crate::event::Event;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Result type returned by listeners.
///
/// A listener failure aborts the dispatch; the caller decides how to surface
/// it (the kernel routes it through its exception path).
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Type-erased listener callback
pub type ListenerFn = Arc<dyn Fn(&mut dyn Event) -> ListenerResult + Send + Sync>;

/// Handle returned by registration, usable with `remove_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("listener for `{key}` failed: {source}")]
    Listener {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("listener for `{key}` expected a different event type")]
    TypeMismatch { key: String },
}

struct Registration {
    id: u64,
    priority: i32,
    seq: u64,
    callback: ListenerFn,
}

/// Priority-ordered, stoppable event dispatcher.
///
/// Listeners are registered under a string key with a priority. On dispatch,
/// the full listener list for the key is sorted by descending priority (ties
/// broken by registration order), cached, and invoked in turn until either
/// the list is exhausted or the event's propagation-stopped flag is set.
/// Listeners mutate the event in place; `dispatch` leaves the mutated event
/// with the caller.
#[derive(Clone)]
pub struct EventDispatcher {
    listeners: Arc<DashMap<String, Vec<Registration>>>,
    sorted: Arc<DashMap<String, Arc<Vec<(u64, ListenerFn)>>>>,
    next_id: Arc<AtomicU64>,
    next_seq: Arc<AtomicU64>,
}

impl EventDispatcher {
    /// Create a new dispatcher
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            sorted: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a type-erased listener for an event key
    pub fn add_listener<F>(&self, key: impl Into<String>, priority: i32, callback: F) -> ListenerId
    where
        F: Fn(&mut dyn Event) -> ListenerResult + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        self.listeners.entry(key.clone()).or_default().push(Registration {
            id,
            priority,
            seq,
            callback: Arc::new(callback),
        });
        self.sorted.remove(&key);

        debug!(key = %key, priority, "Listener registered");
        ListenerId(id)
    }

    /// Register a listener for a concrete event type.
    ///
    /// The callback is wrapped in a downcasting adapter; dispatching an event
    /// of a different type under the same key is reported as a listener
    /// failure rather than silently skipped.
    pub fn listen<E, F>(&self, key: impl Into<String>, priority: i32, callback: F) -> ListenerId
    where
        E: Event,
        F: Fn(&mut E) -> ListenerResult + Send + Sync + 'static,
    {
        let key = key.into();
        let key_for_err = key.clone();
        self.add_listener(key, priority, move |event: &mut dyn Event| {
            match event.as_any_mut().downcast_mut::<E>() {
                Some(typed) => callback(typed),
                None => Err(Box::new(EventError::TypeMismatch {
                    key: key_for_err.clone(),
                })),
            }
        })
    }

    /// Remove a listener by key and id; returns whether something was removed
    pub fn remove_listener(&self, key: &str, id: ListenerId) -> bool {
        let removed = match self.listeners.get_mut(key) {
            Some(mut regs) => {
                let before = regs.len();
                regs.retain(|r| r.id != id.0);
                before != regs.len()
            }
            None => false,
        };
        if removed {
            self.sorted.remove(key);
            debug!(key = %key, "Listener removed");
        }
        removed
    }

    /// Whether any listener is registered for the key
    pub fn has_listeners(&self, key: &str) -> bool {
        self.listener_count(key) > 0
    }

    /// Number of listeners registered for the key
    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners.get(key).map(|r| r.len()).unwrap_or(0)
    }

    /// Listener ids for the key, in dispatch order
    pub fn listener_ids(&self, key: &str) -> Vec<ListenerId> {
        self.ordered(key)
            .iter()
            .map(|(id, _)| ListenerId(*id))
            .collect()
    }

    /// Dispatch an event to every listener registered under `key`.
    ///
    /// Stops early when the event's propagation flag is set or a listener
    /// returns an error. The event is mutated in place.
    pub fn dispatch(&self, event: &mut dyn Event, key: &str) -> Result<(), EventError> {
        let ordered = self.ordered(key);
        if ordered.is_empty() {
            trace!(key = %key, event = event.event_name(), "No listeners registered");
            return Ok(());
        }

        trace!(
            key = %key,
            event = event.event_name(),
            listeners = ordered.len(),
            "Dispatching event"
        );

        for (_, callback) in ordered.iter() {
            if event.propagation_stopped() {
                debug!(key = %key, "Propagation stopped, skipping remaining listeners");
                break;
            }
            if let Err(source) = callback(event) {
                warn!(key = %key, error = %source, "Listener failed");
                return Err(EventError::Listener {
                    key: key.to_string(),
                    source,
                });
            }
        }

        Ok(())
    }

    /// Sorted listener list for a key, computed on first use and cached.
    fn ordered(&self, key: &str) -> Arc<Vec<(u64, ListenerFn)>> {
        if let Some(cached) = self.sorted.get(key) {
            return cached.clone();
        }

        let ordered: Vec<(u64, ListenerFn)> = match self.listeners.get(key) {
            Some(regs) => {
                let mut entries: Vec<(i32, u64, u64, ListenerFn)> = regs
                    .iter()
                    .map(|r| (r.priority, r.seq, r.id, r.callback.clone()))
                    .collect();
                // Descending priority; registration order breaks ties.
                entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
                entries.into_iter().map(|(_, _, id, cb)| (id, cb)).collect()
            }
            None => Vec::new(),
        };

        let ordered = Arc::new(ordered);
        self.sorted.insert(key.to_string(), ordered.clone());
        ordered
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
