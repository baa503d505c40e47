//! Array-backed observable
//!
//! [`ArraySubject`] holds an ordered list and reports every structural change
//! as an [`ArrayChange`]. Subscribers receive the change together with the
//! array as it is after the change, which is all a list reconciler needs to
//! keep a parallel sequence of rendered items in step.

use indexmap::IndexMap;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::subscription::{KeyAllocator, SubscriberKey, Subscription, SubscriptionSource};

/// A structural change to an [`ArraySubject`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArrayChange<T> {
    /// `items` were inserted starting at `index`
    Added { index: usize, items: Vec<T> },
    /// `item` was removed from `index`
    Removed { index: usize, item: T },
    /// Every item was removed
    Cleared,
}

impl<T> ArrayChange<T> {
    /// Index the change applies to (0 for `Cleared`)
    pub fn index(&self) -> usize {
        match self {
            ArrayChange::Added { index, .. } | ArrayChange::Removed { index, .. } => *index,
            ArrayChange::Cleared => 0,
        }
    }
}

type ArrayCallback<T> = Rc<dyn Fn(&ArrayChange<T>, &[T])>;

struct ArraySlot<T> {
    callback: ArrayCallback<T>,
    paused: bool,
}

struct ArrayCore<T> {
    items: RefCell<Vec<T>>,
    slots: RefCell<IndexMap<SubscriberKey, ArraySlot<T>>>,
    keys: KeyAllocator,
}

impl<T: Clone + 'static> ArrayCore<T> {
    fn callback_for(&self, key: SubscriberKey) -> Option<ArrayCallback<T>> {
        self.slots
            .borrow()
            .get(&key)
            .filter(|slot| !slot.paused)
            .map(|slot| Rc::clone(&slot.callback))
    }

    fn notify(&self, change: ArrayChange<T>) {
        let targets: SmallVec<[SubscriberKey; 4]> = self
            .slots
            .borrow()
            .iter()
            .filter(|(_, slot)| !slot.paused)
            .map(|(key, _)| *key)
            .collect();
        if targets.is_empty() {
            return;
        }

        let snapshot = self.items.borrow().clone();
        for key in targets {
            if let Some(callback) = self.callback_for(key) {
                callback(&change, &snapshot);
            }
        }
    }
}

impl<T: Clone + 'static> SubscriptionSource for ArrayCore<T> {
    fn set_paused(&self, key: SubscriberKey, paused: bool) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(&key) {
            slot.paused = paused;
        }
    }

    /// Replays as `Cleared` followed by `Added` of the whole array, which
    /// brings a subscriber that missed changes back in sync
    fn replay(&self, key: SubscriberKey) {
        let Some(callback) = self.callback_for(key) else {
            return;
        };
        let snapshot = self.items.borrow().clone();
        callback(&ArrayChange::Cleared, &[]);
        if !snapshot.is_empty() {
            let change = ArrayChange::Added {
                index: 0,
                items: snapshot.clone(),
            };
            callback(&change, &snapshot);
        }
    }

    fn detach(&self, key: SubscriberKey) {
        self.slots.borrow_mut().shift_remove(&key);
    }
}

/// An observable ordered collection
///
/// Clones share the same array. Out-of-range insert positions are clamped to
/// the end; out-of-range removals are ignored.
pub struct ArraySubject<T> {
    core: Rc<ArrayCore<T>>,
}

impl<T> Clone for ArraySubject<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> ArraySubject<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            core: Rc::new(ArrayCore {
                items: RefCell::new(items),
                slots: RefCell::new(IndexMap::new()),
                keys: KeyAllocator::default(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.core.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.core.items.borrow().get(index).cloned()
    }

    pub fn get_array(&self) -> Vec<T> {
        self.core.items.borrow().clone()
    }

    /// Index of the first item matching `pred`
    pub fn position(&self, pred: impl Fn(&T) -> bool) -> Option<usize> {
        self.core.items.borrow().iter().position(pred)
    }

    pub fn insert(&self, index: usize, item: T) {
        self.insert_range(index, vec![item]);
    }

    pub fn push(&self, item: T) {
        let len = self.len();
        self.insert_range(len, vec![item]);
    }

    /// Insert a batch at `index`, reported as a single `Added` change
    pub fn insert_range(&self, index: usize, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        let index = {
            let mut current = self.core.items.borrow_mut();
            let index = index.min(current.len());
            current.splice(index..index, items.iter().cloned());
            index
        };
        self.core.notify(ArrayChange::Added { index, items });
    }

    pub fn remove_at(&self, index: usize) -> Option<T> {
        let item = {
            let mut current = self.core.items.borrow_mut();
            if index >= current.len() {
                return None;
            }
            current.remove(index)
        };
        self.core.notify(ArrayChange::Removed {
            index,
            item: item.clone(),
        });
        Some(item)
    }

    /// Remove the first item matching `pred`
    pub fn remove_where(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let index = self.position(pred)?;
        self.remove_at(index)
    }

    pub fn clear(&self) {
        {
            let mut current = self.core.items.borrow_mut();
            if current.is_empty() {
                return;
            }
            current.clear();
        }
        self.core.notify(ArrayChange::Cleared);
    }

    /// Replace the whole array (`Cleared` then `Added`)
    pub fn set(&self, items: Vec<T>) {
        self.clear();
        self.insert_range(0, items);
    }

    /// Subscribe to changes; with `fire_immediately` the callback receives
    /// the current contents as an `Added` at index 0 (if non-empty)
    pub fn sub<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&ArrayChange<T>, &[T]) + 'static,
    {
        let key = self.core.keys.next();
        let callback: ArrayCallback<T> = Rc::new(callback);
        self.core.slots.borrow_mut().insert(
            key,
            ArraySlot {
                callback: Rc::clone(&callback),
                paused: false,
            },
        );

        if fire_immediately {
            let snapshot = self.get_array();
            if !snapshot.is_empty() {
                let change = ArrayChange::Added {
                    index: 0,
                    items: snapshot.clone(),
                };
                callback(&change, &snapshot);
            }
        }

        let source = Rc::downgrade(&self.core);
        let source: Weak<dyn SubscriptionSource> = source;
        Subscription::new(source, key)
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.slots.borrow().len()
    }
}

impl<T: Clone + 'static> Default for ArraySubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for ArraySubject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArraySubject")
            .field("items", &*self.core.items.borrow())
            .field("subscribers", &self.core.slots.borrow().len())
            .finish()
    }
}
