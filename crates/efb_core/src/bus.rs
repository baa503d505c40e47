//! Topic-keyed event bus
//!
//! One bus instance is created by the application root and handed by
//! reference (it is a cheap `Rc` clone) to everything that publishes or
//! consumes events. Topics are plain strings; payloads are arbitrary `'static`
//! values checked by type at the consumer.
//!
//! # Delivery
//!
//! - Subscribers of a topic are called synchronously, in subscription order,
//!   before the outermost `publish` returns.
//! - A publish issued from inside a handler is queued and delivered after the
//!   current delivery has finished, so two deliveries never interleave.
//! - The last payload of every topic is cached. Consumers created with
//!   [`Consumer::handle_cached`] receive it immediately, and resuming a paused
//!   bus subscription with replay re-delivers it.
//!
//! ```rust
//! use efb_core::EventBus;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let bus = EventBus::new();
//! let seen = Rc::new(Cell::new(0));
//! let seen_clone = Rc::clone(&seen);
//! let _sub = bus
//!     .subscribe::<u32>("fuel_on_board")
//!     .handle(move |kg| seen_clone.set(*kg));
//!
//! bus.publish("fuel_on_board", 5200u32);
//! assert_eq!(seen.get(), 5200);
//! ```

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::subscription::{KeyAllocator, SubscriberKey, Subscription, SubscriptionSource};

/// Type-erased payload as carried on the bus
pub type Payload = Rc<dyn Any>;

type Handler = Rc<dyn Fn(&dyn Any)>;
type TapHandler = Rc<dyn Fn(&str, &dyn Any)>;

struct HandlerSlot {
    handler: Handler,
    paused: bool,
}

struct TapSlot {
    handler: TapHandler,
    paused: bool,
}

/// Where a subscriber key lives
enum Route {
    Topic(Rc<str>),
    Tap,
}

struct BusCore {
    topics: RefCell<FxHashMap<Rc<str>, IndexMap<SubscriberKey, HandlerSlot>>>,
    taps: RefCell<IndexMap<SubscriberKey, TapSlot>>,
    routes: RefCell<FxHashMap<SubscriberKey, Route>>,
    /// Last payload published on each topic
    cache: RefCell<FxHashMap<Rc<str>, Payload>>,
    queue: RefCell<VecDeque<(Rc<str>, Payload)>>,
    delivering: Cell<bool>,
    keys: KeyAllocator,
    published: Cell<u64>,
    sequence: Cell<u64>,
}

/// Resets the delivering flag even if a handler panics
struct DeliveryGuard<'a>(&'a Cell<bool>);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl BusCore {
    fn intern(&self, topic: &str) -> Rc<str> {
        if let Some((existing, _)) = self.topics.borrow().get_key_value(topic) {
            return Rc::clone(existing);
        }
        Rc::from(topic)
    }

    fn handler_for(&self, topic: &str, key: SubscriberKey) -> Option<Handler> {
        self.topics
            .borrow()
            .get(topic)
            .and_then(|slots| slots.get(&key))
            .filter(|slot| !slot.paused)
            .map(|slot| Rc::clone(&slot.handler))
    }

    fn tap_for(&self, key: SubscriberKey) -> Option<TapHandler> {
        self.taps
            .borrow()
            .get(&key)
            .filter(|slot| !slot.paused)
            .map(|slot| Rc::clone(&slot.handler))
    }

    fn drain(&self) {
        if self.delivering.replace(true) {
            return;
        }
        let _guard = DeliveryGuard(&self.delivering);

        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some((topic, payload)) = next else {
                break;
            };
            self.deliver(&topic, &payload);
        }
    }

    fn deliver(&self, topic: &str, payload: &Payload) {
        let taps: SmallVec<[SubscriberKey; 2]> = self.taps.borrow().keys().copied().collect();
        for key in taps {
            if let Some(tap) = self.tap_for(key) {
                tap(topic, payload.as_ref());
            }
        }

        let targets: SmallVec<[SubscriberKey; 4]> = self
            .topics
            .borrow()
            .get(topic)
            .map(|slots| slots.keys().copied().collect())
            .unwrap_or_default();
        if targets.is_empty() {
            tracing::trace!(topic, "publish with no subscribers");
            return;
        }
        for key in targets {
            if let Some(handler) = self.handler_for(topic, key) {
                handler(payload.as_ref());
            }
        }
    }
}

impl SubscriptionSource for BusCore {
    fn set_paused(&self, key: SubscriberKey, paused: bool) {
        match self.routes.borrow().get(&key) {
            Some(Route::Topic(topic)) => {
                if let Some(slot) = self
                    .topics
                    .borrow_mut()
                    .get_mut(topic)
                    .and_then(|slots| slots.get_mut(&key))
                {
                    slot.paused = paused;
                }
            }
            Some(Route::Tap) => {
                if let Some(slot) = self.taps.borrow_mut().get_mut(&key) {
                    slot.paused = paused;
                }
            }
            None => {}
        }
    }

    fn replay(&self, key: SubscriberKey) {
        let topic = match self.routes.borrow().get(&key) {
            Some(Route::Topic(topic)) => Rc::clone(topic),
            _ => return,
        };
        let cached = self.cache.borrow().get(&topic).cloned();
        if let (Some(payload), Some(handler)) = (cached, self.handler_for(&topic, key)) {
            handler(payload.as_ref());
        }
    }

    fn detach(&self, key: SubscriberKey) {
        match self.routes.borrow_mut().remove(&key) {
            Some(Route::Topic(topic)) => {
                let mut topics = self.topics.borrow_mut();
                if let Some(slots) = topics.get_mut(&topic) {
                    slots.shift_remove(&key);
                    if slots.is_empty() {
                        topics.remove(&topic);
                    }
                }
            }
            Some(Route::Tap) => {
                self.taps.borrow_mut().shift_remove(&key);
            }
            None => {}
        }
    }
}

/// Process-wide publish/subscribe channel
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    core: Rc<BusCore>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            core: Rc::new(BusCore {
                topics: RefCell::new(FxHashMap::default()),
                taps: RefCell::new(IndexMap::new()),
                routes: RefCell::new(FxHashMap::default()),
                cache: RefCell::new(FxHashMap::default()),
                queue: RefCell::new(VecDeque::new()),
                delivering: Cell::new(false),
                keys: KeyAllocator::default(),
                published: Cell::new(0),
                sequence: Cell::new(0),
            }),
        }
    }

    /// Publish `payload` on `topic`
    pub fn publish<T: 'static>(&self, topic: &str, payload: T) {
        let topic = self.core.intern(topic);
        let payload: Payload = Rc::new(payload);
        self.core
            .cache
            .borrow_mut()
            .insert(Rc::clone(&topic), Rc::clone(&payload));
        self.core.published.set(self.core.published.get() + 1);
        self.core.queue.borrow_mut().push_back((topic, payload));
        self.core.drain();
    }

    /// Start a typed consumer for `topic`
    pub fn subscribe<T: 'static>(&self, topic: &str) -> Consumer<T> {
        Consumer {
            bus: self.clone(),
            topic: self.core.intern(topic),
            _marker: PhantomData,
        }
    }

    /// Observe every publish on every topic
    ///
    /// Taps run before the topic's own subscribers. Used for tracing and as a
    /// spy in tests.
    pub fn tap<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str, &dyn Any) + 'static,
    {
        let key = self.core.keys.next();
        self.core.taps.borrow_mut().insert(
            key,
            TapSlot {
                handler: Rc::new(handler),
                paused: false,
            },
        );
        self.core.routes.borrow_mut().insert(key, Route::Tap);
        self.subscription(key)
    }

    /// Last payload published on `topic`, if it has the expected type
    pub fn last<T: Clone + 'static>(&self, topic: &str) -> Option<T> {
        self.core
            .cache
            .borrow()
            .get(topic)
            .and_then(|payload| payload.downcast_ref::<T>().cloned())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.core
            .topics
            .borrow()
            .get(topic)
            .map_or(0, IndexMap::len)
    }

    /// Total number of publishes since creation
    pub fn publish_count(&self) -> u64 {
        self.core.published.get()
    }

    /// Next value of a counter shared by every handle to this bus, starting
    /// at 1
    ///
    /// Protocols layered on the bus draw correlation ids from it so ids never
    /// collide between their clients.
    pub fn next_sequence(&self) -> u64 {
        let next = self.core.sequence.get() + 1;
        self.core.sequence.set(next);
        next
    }

    fn insert_handler(&self, topic: Rc<str>, handler: Handler) -> SubscriberKey {
        let key = self.core.keys.next();
        self.core
            .topics
            .borrow_mut()
            .entry(Rc::clone(&topic))
            .or_default()
            .insert(
                key,
                HandlerSlot {
                    handler,
                    paused: false,
                },
            );
        self.core.routes.borrow_mut().insert(key, Route::Topic(topic));
        key
    }

    fn subscription(&self, key: SubscriberKey) -> Subscription {
        let source = Rc::downgrade(&self.core);
        let source: Weak<dyn SubscriptionSource> = source;
        Subscription::new(source, key)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.core.topics.borrow().len())
            .field("taps", &self.core.taps.borrow().len())
            .field("published", &self.core.published.get())
            .finish()
    }
}

/// Typed consumer of one topic, created by [`EventBus::subscribe`]
pub struct Consumer<T> {
    bus: EventBus,
    topic: Rc<str>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: 'static> Consumer<T> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Handle every future publish on the topic
    pub fn handle<F>(self, handler: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        let key = self.bus.insert_handler(Rc::clone(&self.topic), typed(&self.topic, handler));
        self.bus.subscription(key)
    }

    /// Like [`handle`](Self::handle), and also deliver the topic's last
    /// payload right away if one was published before
    pub fn handle_cached<F>(self, handler: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        let key = self.bus.insert_handler(Rc::clone(&self.topic), typed(&self.topic, handler));
        self.bus.core.replay(key);
        self.bus.subscription(key)
    }
}

fn typed<T: 'static, F: Fn(&T) + 'static>(topic: &Rc<str>, handler: F) -> Handler {
    let topic = Rc::clone(topic);
    Rc::new(move |payload: &dyn Any| match payload.downcast_ref::<T>() {
        Some(value) => handler(value),
        None => tracing::warn!(
            topic = &*topic,
            expected = type_name::<T>(),
            "dropping bus payload of unexpected type"
        ),
    })
}
