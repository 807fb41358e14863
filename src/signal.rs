//! Signal
//!
//! Typed one-to-many event fan-out. Handlers run synchronously on the
//! thread that calls `fire`, in registration order, over a snapshot of the
//! listener list taken when the fire starts.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: u64,
    handler: Handler<T>,
}

struct Listeners<T> {
    next_id: u64,
    slots: Vec<Slot<T>>,
}

impl<T> Listeners<T> {
    fn remove(&mut self, id: u64) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.id != id);
        self.slots.len() != before
    }
}

/// Lets a `Connection` detach itself without knowing the payload type
trait Detach: Send + Sync {
    fn detach(&self, id: u64);
    fn contains(&self, id: u64) -> bool;
}

impl<T> Detach for Mutex<Listeners<T>> {
    fn detach(&self, id: u64) {
        self.lock().unwrap_or_else(PoisonError::into_inner).remove(id);
    }

    fn contains(&self, id: u64) -> bool {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .iter()
            .any(|slot| slot.id == id)
    }
}

/// A multi-subscriber event. Clones share the same listener list.
pub struct Signal<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                slots: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners<T>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler. Connecting the same closure twice yields two
    /// independent firings.
    pub fn connect<F>(&self, handler: F) -> Connection
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut listeners = self.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.slots.push(Slot {
                id,
                handler: Arc::new(handler),
            });
            id
        };

        let target: Arc<dyn Detach> = self.listeners.clone();
        Connection {
            id,
            target: Arc::downgrade(&target),
        }
    }

    /// Invoke every handler connected at the moment of the call.
    pub fn fire(&self, args: &T) {
        let snapshot: Vec<Handler<T>> = self
            .lock()
            .slots
            .iter()
            .map(|slot| slot.handler.clone())
            .collect();

        for handler in snapshot {
            handler(args);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().slots.len()
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len();
        f.debug_struct("Signal").field("listeners", &count).finish()
    }
}

/// Token returned by `Signal::connect`.
///
/// Dropping a connection does not disconnect it.
pub struct Connection {
    id: u64,
    target: Weak<dyn Detach>,
}

impl Connection {
    /// Remove the handler. Calling this more than once is a no-op.
    pub fn disconnect(&self) {
        if let Some(target) = self.target.upgrade() {
            target.detach(self.id);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.target
            .upgrade()
            .is_some_and(|target| target.contains(self.id))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_in_registration_order() {
        let signal: Signal<i32> = Signal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            signal.connect(move |value| seen.lock().unwrap().push(format!("{}{}", tag, value)));
        }

        signal.fire(&1);
        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_same_handler_twice_fires_twice() {
        let signal: Signal<()> = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = {
            let count = count.clone();
            move |_: &()| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };

        signal.connect(handler.clone());
        signal.connect(handler);
        signal.fire(&());

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let signal: Signal<()> = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let conn = {
            let count = count.clone();
            signal.connect(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(conn.is_connected());
        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_connected());

        signal.fire(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_self_disconnect_does_not_skip_remaining_handlers() {
        let signal: Signal<()> = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));

        let conn = {
            let slot = slot.clone();
            let count = count.clone();
            signal.connect(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(conn) = slot.lock().unwrap().as_ref() {
                    conn.disconnect();
                }
            })
        };
        *slot.lock().unwrap() = Some(conn);

        {
            let count = count.clone();
            signal.connect(move |_| {
                count.fetch_add(10, Ordering::SeqCst);
            });
        }

        signal.fire(&());
        assert_eq!(count.load(Ordering::SeqCst), 11);

        // Only the second handler remains
        signal.fire(&());
        assert_eq!(count.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_handler_connected_during_fire_waits_for_next_fire() {
        let signal: Signal<()> = Signal::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        {
            let inner = signal.clone();
            let late_calls = late_calls.clone();
            signal.connect(move |_| {
                let late_calls = late_calls.clone();
                inner.connect(move |_| {
                    late_calls.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        signal.fire(&());
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        signal.fire(&());
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_outliving_signal() {
        let signal: Signal<()> = Signal::new();
        let conn = signal.connect(|_| {});
        drop(signal);

        assert!(!conn.is_connected());
        conn.disconnect();
    }
}
