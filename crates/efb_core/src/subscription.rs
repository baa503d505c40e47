//! Subscription handles
//!
//! A [`Subscription`] is the live binding between an observable source and a
//! callback. Every source in this crate ([`Subject`](crate::Subject),
//! [`ArraySubject`](crate::ArraySubject), [`EventBus`](crate::EventBus))
//! hands one out from its `sub`/`handle` method, and the owning view keeps it
//! so the binding can follow the view's lifecycle:
//!
//! ```ignore
//! let sub = altitude.sub(|ft| println!("{ft} ft"), true);
//! sub.pause();        // callback stops receiving changes
//! sub.resume(true);   // callback receives the current value right away
//! sub.destroy();      // binding removed from the source, terminal
//! sub.destroy();      // no-op
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Key of a subscriber slot inside a source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberKey(u64);

impl SubscriberKey {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }
}

/// Monotonic allocator for subscriber keys, one per source
#[derive(Debug, Default)]
pub struct KeyAllocator {
    next: Cell<u64>,
}

impl KeyAllocator {
    pub fn next(&self) -> SubscriberKey {
        let raw = self.next.get();
        self.next.set(raw + 1);
        SubscriberKey(raw)
    }
}

/// A source that can pause, replay and drop individual subscriber slots
///
/// Implemented by every observable in this crate. External observables (a
/// simulation variable bridge, for instance) implement it to hand out
/// [`Subscription`]s that follow the same lifecycle rules.
pub trait SubscriptionSource {
    /// Stop or restart delivery to a slot
    fn set_paused(&self, key: SubscriberKey, paused: bool);
    /// Deliver the current value to a single slot
    fn replay(&self, key: SubscriberKey);
    /// Remove a slot permanently
    fn detach(&self, key: SubscriberKey);
}

/// Lifecycle state of a subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SubscriptionState {
    #[default]
    Active,
    Paused,
    Destroyed,
}

struct SubscriptionCore {
    key: SubscriberKey,
    source: Weak<dyn SubscriptionSource>,
    state: Cell<SubscriptionState>,
}

/// Handle to a live binding between a source and a callback
///
/// Cloning the handle does not create a new binding; every clone controls the
/// same slot. All operations are idempotent and never fail, including after
/// the source itself has been dropped.
#[derive(Clone)]
pub struct Subscription {
    core: Rc<SubscriptionCore>,
}

impl Subscription {
    pub fn new(source: Weak<dyn SubscriptionSource>, key: SubscriberKey) -> Self {
        Self {
            core: Rc::new(SubscriptionCore {
                key,
                source,
                state: Cell::new(SubscriptionState::Active),
            }),
        }
    }

    /// A subscription that is already destroyed
    ///
    /// Returned when subscribing to a source that no longer exists.
    pub fn detached() -> Self {
        let source: Weak<dyn SubscriptionSource> = Weak::<NullSource>::new();
        let sub = Self::new(source, SubscriberKey(u64::MAX));
        sub.core.state.set(SubscriptionState::Destroyed);
        sub
    }

    pub fn key(&self) -> SubscriberKey {
        self.core.key
    }

    pub fn state(&self) -> SubscriptionState {
        self.core.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    pub fn is_paused(&self) -> bool {
        self.state() == SubscriptionState::Paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == SubscriptionState::Destroyed
    }

    /// Stop delivering notifications until resumed
    pub fn pause(&self) {
        if self.state() != SubscriptionState::Active {
            return;
        }
        self.core.state.set(SubscriptionState::Paused);
        if let Some(source) = self.core.source.upgrade() {
            source.set_paused(self.core.key, true);
        }
    }

    /// Restart delivery; with `replay` the callback immediately receives the
    /// source's current value
    pub fn resume(&self, replay: bool) {
        if self.state() != SubscriptionState::Paused {
            return;
        }
        self.core.state.set(SubscriptionState::Active);
        if let Some(source) = self.core.source.upgrade() {
            source.set_paused(self.core.key, false);
            if replay {
                source.replay(self.core.key);
            }
        }
    }

    /// Remove the binding from its source
    pub fn destroy(&self) {
        if self.state() == SubscriptionState::Destroyed {
            return;
        }
        self.core.state.set(SubscriptionState::Destroyed);
        if let Some(source) = self.core.source.upgrade() {
            source.detach(self.core.key);
        }
    }

    /// Whether two handles control the same binding
    pub fn same_binding(&self, other: &Subscription) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.core.key)
            .field("state", &self.state())
            .finish()
    }
}

struct NullSource;

impl SubscriptionSource for NullSource {
    fn set_paused(&self, _key: SubscriberKey, _paused: bool) {}
    fn replay(&self, _key: SubscriberKey) {}
    fn detach(&self, _key: SubscriberKey) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl SubscriptionSource for Recorder {
        fn set_paused(&self, key: SubscriberKey, paused: bool) {
            self.calls
                .borrow_mut()
                .push(format!("paused({}, {paused})", key.to_raw()));
        }

        fn replay(&self, key: SubscriberKey) {
            self.calls
                .borrow_mut()
                .push(format!("replay({})", key.to_raw()));
        }

        fn detach(&self, key: SubscriberKey) {
            self.calls
                .borrow_mut()
                .push(format!("detach({})", key.to_raw()));
        }
    }

    fn subscription(source: &Rc<Recorder>) -> Subscription {
        let weak = Rc::downgrade(source);
        let weak: Weak<dyn SubscriptionSource> = weak;
        Subscription::new(weak, SubscriberKey::from_raw(7))
    }

    #[test]
    fn test_pause_resume_are_idempotent() {
        let source = Rc::new(Recorder::default());
        let sub = subscription(&source);

        sub.pause();
        sub.pause();
        assert!(sub.is_paused());

        sub.resume(true);
        sub.resume(true);
        assert!(sub.is_active());

        assert_eq!(
            *source.calls.borrow(),
            vec!["paused(7, true)", "paused(7, false)", "replay(7)"]
        );
    }

    #[test]
    fn test_destroy_is_terminal() {
        let source = Rc::new(Recorder::default());
        let sub = subscription(&source);

        sub.destroy();
        sub.destroy();
        sub.pause();
        sub.resume(true);

        assert!(sub.is_destroyed());
        assert_eq!(*source.calls.borrow(), vec!["detach(7)"]);
    }

    #[test]
    fn test_clones_share_state() {
        let source = Rc::new(Recorder::default());
        let sub = subscription(&source);
        let other = sub.clone();

        other.pause();
        assert!(sub.is_paused());
        assert!(sub.same_binding(&other));
    }

    #[test]
    fn test_dropped_source_is_harmless() {
        let source = Rc::new(Recorder::default());
        let sub = subscription(&source);
        drop(source);

        sub.pause();
        sub.resume(true);
        sub.destroy();
        assert!(sub.is_destroyed());
        assert!(Subscription::detached().is_destroyed());
    }
}
