//! Entity change events and the subscription list that carries them

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Raised after a property value changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChangedEvent {
    pub property: String,
}

impl PropertyChangedEvent {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
        }
    }
}

/// Raised when an entity moves between clean and dirty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyStateChangeEvent {
    pub was_dirty: bool,
    pub is_dirty: bool,
}

/// Handle returned by [`EventSource::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Thread-safe list of event handlers.
///
/// Handlers are invoked outside the internal lock, so a handler may subscribe,
/// unsubscribe or emit on the same source.
pub struct EventSource<E> {
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> EventSource<E> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Unknown or already-removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl<E> Default for EventSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventSource<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_reaches_all_handlers() {
        let source = EventSource::<PropertyChangedEvent>::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let events = Arc::clone(&events);
            source.subscribe(move |e: &PropertyChangedEvent| {
                events.lock().unwrap().push(format!("{}: {}", tag, e.property));
            });
        }

        source.emit(&PropertyChangedEvent::new("Name"));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["first: Name".to_string(), "second: Name".to_string()]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let source = EventSource::<DirtyStateChangeEvent>::new();
        let id = source.subscribe(|_| {});

        assert!(source.unsubscribe(id));
        assert!(!source.unsubscribe(id));
        assert_eq!(source.handler_count(), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let source = Arc::new(EventSource::<PropertyChangedEvent>::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let inner_source = Arc::clone(&source);
        let inner_slot = Arc::clone(&slot);
        let id = source.subscribe(move |_| {
            if let Some(id) = inner_slot.lock().unwrap().take() {
                inner_source.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        source.emit(&PropertyChangedEvent::new("x"));
        assert_eq!(source.handler_count(), 0);
    }
}
