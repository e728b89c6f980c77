//! Typed event bus shared by the simulators and the call-stack manager
//!
//! Each simulator owns one [`EventBus`] parameterized over its event enum.
//! Subscribers register callbacks for one event kind (or for every kind) and
//! receive an unsubscribe handle; handles are the only way to remove a
//! callback, since closures are not comparable.
//!
//! # Isolation guarantees
//!
//! - The subscriber set is snapshotted before dispatch, so a callback that
//!   unsubscribes itself (or anything else) during emission never invalidates
//!   the in-flight dispatch.
//! - A panicking callback is caught, logged through `tracing`, and never
//!   disturbs the emitting simulator or the remaining subscribers.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use choreo_core::event::{BusEvent, EventBus};
//!
//! #[derive(Clone, Debug)]
//! enum PingEvent { Ping, Pong }
//!
//! #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
//! enum PingKind { Ping, Pong }
//!
//! impl BusEvent for PingEvent {
//!     type Kind = PingKind;
//!     fn kind(&self) -> PingKind {
//!         match self {
//!             PingEvent::Ping => PingKind::Ping,
//!             PingEvent::Pong => PingKind::Pong,
//!         }
//!     }
//! }
//!
//! let bus: EventBus<PingEvent> = EventBus::new();
//! let seen = Arc::new(Mutex::new(0));
//! let seen2 = seen.clone();
//!
//! let handle = bus.on(PingKind::Ping, move |_| { *seen2.lock().unwrap() += 1; });
//! bus.emit(&PingEvent::Ping);
//! bus.emit(&PingEvent::Pong); // not subscribed
//! assert_eq!(*seen.lock().unwrap(), 1);
//!
//! bus.off(handle);
//! bus.emit(&PingEvent::Ping);
//! assert_eq!(*seen.lock().unwrap(), 1);
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Events dispatchable on an [`EventBus`]
///
/// `Kind` is the copyable discriminant subscribers filter on.
pub trait BusEvent: Clone {
    /// Discriminant type used for subscription filtering
    type Kind: Copy + Eq + Hash;

    /// The discriminant of this event
    fn kind(&self) -> Self::Kind;
}

/// Opaque unsubscribe handle returned by [`EventBus::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscribers<E: BusEvent> {
    by_kind: HashMap<E::Kind, Vec<(SubscriptionId, Callback<E>)>>,
    any: Vec<(SubscriptionId, Callback<E>)>,
}

impl<E: BusEvent> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            by_kind: HashMap::new(),
            any: Vec::new(),
        }
    }
}

/// Per-simulator publish/subscribe dispatcher
///
/// Cloning a bus shares its subscriber set; simulators clone themselves for
/// interleaving exploration without re-wiring observers.
pub struct EventBus<E: BusEvent> {
    subscribers: Arc<Mutex<Subscribers<E>>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl<E: BusEvent> EventBus<E> {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    /// Subscribe `callback` to events of `kind`
    pub fn on<F>(&self, kind: E::Kind, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let mut subs = self.subscribers.lock().expect("event bus poisoned");
        subs.by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Subscribe `callback` to every event
    pub fn on_any<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let mut subs = self.subscribers.lock().expect("event bus poisoned");
        subs.any.push((id, Arc::new(callback)));
        id
    }

    /// Remove one subscription; returns whether it existed
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.lock().expect("event bus poisoned");
        let mut removed = false;
        for list in subs.by_kind.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        let before = subs.any.len();
        subs.any.retain(|(sid, _)| *sid != id);
        removed || subs.any.len() != before
    }

    /// Remove every subscription for one kind
    pub fn off_kind(&self, kind: E::Kind) -> usize {
        let mut subs = self.subscribers.lock().expect("event bus poisoned");
        subs.by_kind.remove(&kind).map(|l| l.len()).unwrap_or(0)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let subs = self.subscribers.lock().expect("event bus poisoned");
        subs.by_kind.values().map(Vec::len).sum::<usize>() + subs.any.len()
    }

    /// Dispatch `event` to matching subscribers
    ///
    /// The subscriber set is snapshotted first; callbacks registered or
    /// removed by an in-flight callback take effect for the next emission.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = {
            let subs = self.subscribers.lock().expect("event bus poisoned");
            let mut cbs: Vec<Callback<E>> = subs
                .by_kind
                .get(&event.kind())
                .map(|l| l.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default();
            cbs.extend(subs.any.iter().map(|(_, cb)| Arc::clone(cb)));
            cbs
        };

        for cb in snapshot {
            if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                tracing::warn!("event subscriber panicked; continuing dispatch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    enum TestEvent {
        A(u32),
        B,
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum TestKind {
        A,
        B,
    }

    impl BusEvent for TestEvent {
        type Kind = TestKind;
        fn kind(&self) -> TestKind {
            match self {
                TestEvent::A(_) => TestKind::A,
                TestEvent::B => TestKind::B,
            }
        }
    }

    #[test]
    fn test_kind_filtering() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.on(TestKind::A, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&TestEvent::A(1));
        bus.emit(&TestEvent::B);
        bus.emit(&TestEvent::A(2));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_on_any_sees_everything() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.on_any(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&TestEvent::A(1));
        bus.emit(&TestEvent::B);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_off_removes_subscription() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.on(TestKind::A, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&TestEvent::A(1));
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(&TestEvent::A(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_disturb_others() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on(TestKind::A, |_| panic!("misbehaving subscriber"));
        let c = count.clone();
        bus.on(TestKind::A, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&TestEvent::A(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_emission_is_safe() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let bus_clone = bus.clone();
        let id_holder: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let holder = id_holder.clone();
        let c = count.clone();
        let id = bus.on(TestKind::A, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *holder.lock().unwrap() {
                bus_clone.off(id);
            }
        });
        *id_holder.lock().unwrap() = Some(id);

        bus.emit(&TestEvent::A(1));
        bus.emit(&TestEvent::A(2));
        // Second emission sees the subscriber already removed.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_kind_clears_wholesale() {
        let bus: EventBus<TestEvent> = EventBus::new();
        bus.on(TestKind::A, |_| {});
        bus.on(TestKind::A, |_| {});
        bus.on(TestKind::B, |_| {});
        assert_eq!(bus.off_kind(TestKind::A), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
