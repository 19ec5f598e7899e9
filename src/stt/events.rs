//! Handler registries for recognizer events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Event handler callback. Called from whichever thread emits the event.
pub type Handler<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Identifies one registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

type Entry<T> = (HandlerToken, Arc<dyn Fn(&T) + Send + Sync>);

/// A list of handlers for one event kind.
///
/// Clones share the same registry, so an emitting task can hold a clone while
/// the owner keeps adding and removing handlers.
pub struct EventSource<T> {
    handlers: Arc<Mutex<Vec<Entry<T>>>>,
    next_token: Arc<AtomicU64>,
}

impl<T> Clone for EventSource<T> {
    fn clone(&self) -> Self {
        Self { handlers: self.handlers.clone(), next_token: self.next_token.clone() }
    }
}

impl<T> Default for EventSource<T> {
    fn default() -> Self {
        Self { handlers: Arc::new(Mutex::new(Vec::new())), next_token: Arc::new(AtomicU64::new(1)) }
    }
}

impl<T> EventSource<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn add(&self, handler: Handler<T>) -> HandlerToken {
        let token = HandlerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((token, Arc::from(handler)));
        token
    }

    /// Remove a handler. Returns false if the token was not registered.
    pub fn remove(&self, token: HandlerToken) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    /// Call every registered handler with `event`.
    ///
    /// Handlers run outside the registry lock so they may add or remove
    /// handlers themselves.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<_> = self.handlers.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in snapshot {
            handler(event);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }
}
