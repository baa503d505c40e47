//! Observable value cells
//!
//! Push-based observables in the style of signals:
//! - [`Subject`] is a mutable cell that notifies subscribers when its value
//!   changes
//! - [`ReadOnly`] is a view of a subject handed down to observers that must
//!   not write it
//! - [`Mapped`] is a derived cell kept up to date by a binding to its source;
//!   that binding is an ordinary [`Subscription`] so it can be owned, paused
//!   and destroyed by a view like any other
//!
//! # Example
//!
//! ```rust
//! use efb_core::{Observable, Subject};
//!
//! let altitude = Subject::new(1000i32);
//! let flight_level = altitude.map(|ft| ft / 100);
//!
//! altitude.set(35000);
//! assert_eq!(flight_level.get(), 350);
//! ```
//!
//! All cells are single-threaded (`Rc` based). Callbacks run synchronously
//! inside `set`, in subscription order, and receive a snapshot of the value
//! so they are free to read or write any cell, including the one notifying.

use indexmap::IndexMap;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::subscription::{KeyAllocator, SubscriberKey, Subscription, SubscriptionSource};

type Callback<T> = Rc<dyn Fn(&T)>;

/// Read access plus subscription for any observable value
pub trait Observable<T: Clone + 'static> {
    /// Current value
    fn get(&self) -> T;

    /// Subscribe to changes; with `fire_immediately` the callback also runs
    /// once right away with the current value
    fn sub<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&T) + 'static;

    /// Derive a new observable by applying `f` to every value
    fn map<U, F>(&self, f: F) -> Mapped<U>
    where
        Self: Sized,
        U: Clone + PartialEq + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let output = Subject::new(f(&self.get()));
        let sink = output.clone();
        let binding = self.sub(move |value| sink.set(f(value)), false);
        Mapped {
            output: output.read_only(),
            binding,
        }
    }
}

// =============================================================================
// SUBJECT STORAGE
// =============================================================================

struct Slot<T> {
    callback: Callback<T>,
    paused: bool,
}

struct SubjectCore<T> {
    value: RefCell<T>,
    slots: RefCell<IndexMap<SubscriberKey, Slot<T>>>,
    keys: KeyAllocator,
    /// Bumped on every accepted write
    version: Cell<u64>,
}

impl<T: Clone + 'static> SubjectCore<T> {
    fn new(initial: T) -> Self {
        Self {
            value: RefCell::new(initial),
            slots: RefCell::new(IndexMap::new()),
            keys: KeyAllocator::default(),
            version: Cell::new(0),
        }
    }

    fn is_live(&self, key: SubscriberKey) -> bool {
        self.slots.borrow().get(&key).is_some_and(|slot| !slot.paused)
    }

    fn notify(&self) {
        let targets: SmallVec<[(SubscriberKey, Callback<T>); 4]> = self
            .slots
            .borrow()
            .iter()
            .filter(|(_, slot)| !slot.paused)
            .map(|(key, slot)| (*key, Rc::clone(&slot.callback)))
            .collect();
        if targets.is_empty() {
            return;
        }

        let value = self.value.borrow().clone();
        for (key, callback) in targets {
            // An earlier callback may have paused or destroyed this one
            if self.is_live(key) {
                callback(&value);
            }
        }
    }
}

impl<T: Clone + 'static> SubscriptionSource for SubjectCore<T> {
    fn set_paused(&self, key: SubscriberKey, paused: bool) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(&key) {
            slot.paused = paused;
        }
    }

    fn replay(&self, key: SubscriberKey) {
        let callback = self
            .slots
            .borrow()
            .get(&key)
            .filter(|slot| !slot.paused)
            .map(|slot| Rc::clone(&slot.callback));
        if let Some(callback) = callback {
            let value = self.value.borrow().clone();
            callback(&value);
        }
    }

    fn detach(&self, key: SubscriberKey) {
        self.slots.borrow_mut().shift_remove(&key);
    }
}

fn subscribe<T, F>(core: &Rc<SubjectCore<T>>, callback: F, fire_immediately: bool) -> Subscription
where
    T: Clone + 'static,
    F: Fn(&T) + 'static,
{
    let key = core.keys.next();
    core.slots.borrow_mut().insert(
        key,
        Slot {
            callback: Rc::new(callback),
            paused: false,
        },
    );

    let source = Rc::downgrade(core);
    let source: Weak<dyn SubscriptionSource> = source;
    let subscription = Subscription::new(source, key);
    if fire_immediately {
        core.replay(key);
    }
    subscription
}

// =============================================================================
// SUBJECT
// =============================================================================

/// A mutable observable cell
///
/// Clones share the same cell. Writes that do not change the value (by
/// `PartialEq`) are ignored and notify nobody.
pub struct Subject<T> {
    core: Rc<SubjectCore<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Subject<T> {
    pub fn new(initial: T) -> Self {
        Self {
            core: Rc::new(SubjectCore::new(initial)),
        }
    }

    pub fn get(&self) -> T {
        self.core.value.borrow().clone()
    }

    /// Borrow the current value without cloning it
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.core.value.borrow())
    }

    /// Set a new value, notifying subscribers if it differs from the old one
    pub fn set(&self, value: T) {
        {
            let mut current = self.core.value.borrow_mut();
            if *current == value {
                return;
            }
            *current = value;
        }
        self.core.version.set(self.core.version.get() + 1);
        self.core.notify();
    }

    /// Set the value computed from the current one
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with(f);
        self.set(next);
    }

    pub fn sub<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        subscribe(&self.core, callback, fire_immediately)
    }

    /// Number of accepted writes since creation
    pub fn version(&self) -> u64 {
        self.core.version.get()
    }

    /// Number of live (active or paused) subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.core.slots.borrow().len()
    }

    /// A handle that can observe but not write this cell
    pub fn read_only(&self) -> ReadOnly<T> {
        ReadOnly {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> for Subject<T> {
    fn get(&self) -> T {
        Subject::get(self)
    }

    fn sub<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        Subject::sub(self, callback, fire_immediately)
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("value", &*self.core.value.borrow())
            .field("subscribers", &self.core.slots.borrow().len())
            .finish()
    }
}

// =============================================================================
// READ-ONLY VIEW
// =============================================================================

/// Observer-side handle to a [`Subject`]
///
/// Passed down as a prop when the creating view remains the sole writer.
pub struct ReadOnly<T> {
    core: Rc<SubjectCore<T>>,
}

impl<T> Clone for ReadOnly<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + PartialEq + 'static> ReadOnly<T> {
    pub fn get(&self) -> T {
        self.core.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.core.value.borrow())
    }

    pub fn sub<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        subscribe(&self.core, callback, fire_immediately)
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.slots.borrow().len()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> for ReadOnly<T> {
    fn get(&self) -> T {
        ReadOnly::get(self)
    }

    fn sub<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        ReadOnly::sub(self, callback, fire_immediately)
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnly<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnly")
            .field(&*self.core.value.borrow())
            .finish()
    }
}

// =============================================================================
// MAPPED
// =============================================================================

/// A derived observable
///
/// Holds its output cell and the binding that keeps it in sync with the
/// source. Pausing the binding freezes the derived value; resuming it with
/// replay recomputes from the source's current value.
pub struct Mapped<U> {
    output: ReadOnly<U>,
    binding: Subscription,
}

impl<U: Clone + PartialEq + 'static> Mapped<U> {
    pub fn get(&self) -> U {
        self.output.get()
    }

    pub fn sub<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&U) + 'static,
    {
        self.output.sub(callback, fire_immediately)
    }

    /// The subscription that keeps this value derived from its source
    pub fn binding(&self) -> &Subscription {
        &self.binding
    }

    pub fn read_only(&self) -> ReadOnly<U> {
        self.output.clone()
    }

    pub fn into_parts(self) -> (ReadOnly<U>, Subscription) {
        (self.output, self.binding)
    }
}

impl<U: Clone + PartialEq + 'static> Observable<U> for Mapped<U> {
    fn get(&self) -> U {
        Mapped::get(self)
    }

    fn sub<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&U) + 'static,
    {
        Mapped::sub(self, callback, fire_immediately)
    }
}

impl<U: fmt::Debug> fmt::Debug for Mapped<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapped")
            .field("output", &self.output)
            .field("binding", &self.binding)
            .finish()
    }
}
