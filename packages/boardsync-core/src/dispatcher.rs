/// In-process publish/subscribe registry for board events.
///
/// Handlers are keyed by [`EventKind`] and invoked synchronously, in
/// registration order, on the thread calling [`EventDispatcher::emit`].
/// Events without subscribers are dropped. The handler list is snapshotted
/// before delivery, so a handler may subscribe or unsubscribe (itself
/// included) without deadlocking; such changes take effect from the next emit.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::event::{BoardEvent, EventKind};

pub type Handler = Arc<dyn Fn(&BoardEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: BTreeMap<EventKind, Vec<(HandlerId, Handler)>>,
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `kind`. The returned id is needed to unsubscribe.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&BoardEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner);
        registry.next_id += 1;
        let id = HandlerId(registry.next_id);
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unsubscribe. Returns false if the id was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut registry = lock(&self.inner);
        let Some(list) = registry.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            registry.handlers.remove(&kind);
        }
        removed
    }

    /// Deliver `event` to every handler subscribed to its kind. Returns the
    /// number of handlers invoked.
    pub fn emit(&self, event: &BoardEvent) -> usize {
        let handlers: Vec<Handler> = {
            let registry = lock(&self.inner);
            match registry.handlers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => Vec::new(),
            }
        };
        if handlers.is_empty() {
            log::trace!("[dispatcher] No handlers for {}", event.kind());
        }
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        lock(&self.inner)
            .handlers
            .get(&kind)
            .map_or(0, |list| list.len())
    }
}

fn lock(inner: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    // Handlers never run under the lock, so a poisoned registry is still consistent.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
