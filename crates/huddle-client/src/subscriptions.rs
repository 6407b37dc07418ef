//! Broadcast subscriptions and session lifecycle events.
//!
//! Provides [`SubscriberRegistry`], the callback registry behind
//! [`Session::on_message`](crate::Session::on_message), with the
//! [`Subscription`] cancellation handle, plus [`ConnectionState`] and
//! [`SessionEvent`] for connection lifecycle tracking.
//!
//! Callbacks run on the session's thread. Dispatch never holds a `RefCell`
//! borrow while a callback runs, so a callback may cancel itself, cancel
//! others, or call back into the session.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use huddle_protocol::BroadcastMessage;

// ============================================================================
// Event Types
// ============================================================================

/// Connection lifecycle state.
///
/// Subscribe to transitions via [`Session::subscribe_events()`](crate::Session::subscribe_events).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport handle. Initial state, and the idle state after
    /// `disconnect()` or reconnection exhaustion.
    #[default]
    Disconnected,
    /// Handle opened, first handshake in flight.
    Connecting,
    Connected,
    /// Link lost or handshake failed; retry `attempt` is scheduled.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Lifecycle notifications pushed to [`Session::subscribe_events()`](crate::Session::subscribe_events).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// A retry was handed to the transport.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Retries ran out; the session is idle until `connect()` is called again.
    ReconnectExhausted { attempts: u32 },
    /// A connect error or abnormal disconnect, as reported by the transport.
    TransportError(String),
    /// An inbound frame failed to decode.
    ProtocolViolation(String),
}

// ============================================================================
// Subscriber Registry
// ============================================================================

type Callback = Rc<dyn Fn(&BroadcastMessage)>;

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

impl RegistryInner {
    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }
}

/// Callbacks registered for inbound broadcasts, in registration order.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; the returned handle deregisters exactly this one.
    pub fn register<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BroadcastMessage) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.push((id, Rc::new(callback)));
        Subscription {
            id,
            registry: Rc::downgrade(&self.inner),
        }
    }

    /// Deliver `message` to every callback still registered when its turn
    /// comes. Returns how many callbacks ran.
    pub fn dispatch(&self, message: &BroadcastMessage) -> usize {
        let snapshot: Vec<(u64, Callback)> = self.inner.borrow().entries.clone();
        let mut delivered = 0;
        for (id, callback) in snapshot {
            // A callback earlier in this pass may have cancelled this one
            if !self.inner.borrow().contains(id) {
                continue;
            }
            callback(message);
            delivered += 1;
        }
        delivered
    }

    /// Drop every callback. Outstanding handles become inert.
    pub fn clear(&self) {
        // Take the entries out first so callback destructors run unborrowed
        let entries = std::mem::take(&mut self.inner.borrow_mut().entries);
        drop(entries);
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cancellation handle returned by `on_message`.
///
/// Dropping the handle does **not** cancel the subscription.
#[must_use = "dropping a Subscription leaves the callback registered; keep it to cancel"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<RegistryInner>>,
}

impl Subscription {
    /// Deregister the callback. Idempotent; a no-op once the session has
    /// disconnected or been dropped. Safe to call from inside the callback.
    pub fn cancel(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let removed = {
            let mut inner = registry.borrow_mut();
            let position = inner.entries.iter().position(|(id, _)| *id == self.id);
            position.map(|idx| inner.entries.remove(idx))
        };
        // Callback destructor runs after the borrow is released
        drop(removed);
    }

    /// Whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.borrow().contains(self.id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<u32>>, impl Fn(&BroadcastMessage) + 'static) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, move |_: &BroadcastMessage| c.set(c.get() + 1))
    }

    #[test]
    fn test_dispatch_reaches_all() {
        let registry = SubscriberRegistry::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let _sa = registry.register(cb_a);
        let _sb = registry.register(cb_b);

        assert_eq!(registry.dispatch(&BroadcastMessage::text("c", "hi")), 2);
        assert_eq!((a.get(), b.get()), (1, 1));
    }

    #[test]
    fn test_cancel_removes_only_that_callback() {
        let registry = SubscriberRegistry::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let sa = registry.register(cb_a);
        let sb = registry.register(cb_b);

        sa.cancel();
        registry.dispatch(&BroadcastMessage::default());

        assert_eq!(a.get(), 0);
        assert_eq!(b.get(), 1);
        assert!(!sa.is_active());
        assert!(sb.is_active());
    }

    #[test]
    fn test_cancel_twice_is_noop() {
        let registry = SubscriberRegistry::new();
        let (_, cb) = counter();
        let sub = registry.register(cb);
        sub.cancel();
        sub.cancel();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_after_registry_dropped() {
        let registry = SubscriberRegistry::new();
        let (_, cb) = counter();
        let sub = registry.register(cb);
        drop(registry);
        sub.cancel();
        assert!(!sub.is_active());
    }

    #[test]
    fn test_cancel_from_inside_callback() {
        let registry = SubscriberRegistry::new();
        let count = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let c = count.clone();
        let s = slot.clone();
        let sub = registry.register(move |_| {
            c.set(c.get() + 1);
            if let Some(sub) = s.borrow().as_ref() {
                sub.cancel();
            }
        });
        *slot.borrow_mut() = Some(sub);

        registry.dispatch(&BroadcastMessage::default());
        registry.dispatch(&BroadcastMessage::default());
        assert_eq!(count.get(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_earlier_callback_cancels_later_one() {
        let registry = SubscriberRegistry::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let s = slot.clone();
        let _first = registry.register(move |_| {
            if let Some(sub) = s.borrow().as_ref() {
                sub.cancel();
            }
        });
        let (b, cb_b) = counter();
        *slot.borrow_mut() = Some(registry.register(cb_b));

        assert_eq!(registry.dispatch(&BroadcastMessage::default()), 1);
        assert_eq!(b.get(), 0);
    }

    #[test]
    fn test_clear_makes_handles_inert() {
        let registry = SubscriberRegistry::new();
        let (a, cb) = counter();
        let sub = registry.register(cb);
        registry.clear();

        assert!(!sub.is_active());
        sub.cancel();
        registry.dispatch(&BroadcastMessage::default());
        assert_eq!(a.get(), 0);
    }

    #[test]
    fn test_register_during_dispatch_waits_for_next_pass() {
        let registry = SubscriberRegistry::new();
        let (late, cb_late) = counter();
        let cb_late = Rc::new(RefCell::new(Some(cb_late)));
        let keep: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let r = registry.clone();
        let k = keep.clone();
        let _sub = registry.register(move |_| {
            if let Some(cb) = cb_late.borrow_mut().take() {
                k.borrow_mut().push(r.register(cb));
            }
        });

        registry.dispatch(&BroadcastMessage::default());
        assert_eq!(late.get(), 0);
        registry.dispatch(&BroadcastMessage::default());
        assert_eq!(late.get(), 1);
    }

    #[test]
    fn test_state_predicates() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Reconnecting { attempt: 1 }.is_connected());
    }
}
