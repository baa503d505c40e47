//! EFB Core Runtime
//!
//! Foundational primitives for the EFB tablet UI:
//!
//! - **Observables**: [`Subject`], derived [`Mapped`] values and the
//!   array-backed [`ArraySubject`]
//! - **Subscriptions**: pausable, resumable, destroy-once handles shared by
//!   every source
//! - **Event Bus**: topic-keyed publish/subscribe with queued delivery and a
//!   last-value cache
//! - **Notifications**: transient messages with pausable countdowns
//!
//! # Example
//!
//! ```rust
//! use efb_core::{Observable, Subject};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let altitude = Subject::new(3500i32);
//! let flight_level = altitude.map(|ft| ft / 100);
//!
//! let shown = Rc::new(Cell::new(0));
//! let shown_clone = Rc::clone(&shown);
//! let sub = flight_level.sub(move |fl| shown_clone.set(*fl), true);
//! assert_eq!(shown.get(), 35);
//!
//! sub.pause();
//! altitude.set(12000);
//! assert_eq!(shown.get(), 35);
//!
//! sub.resume(true);
//! assert_eq!(shown.get(), 120);
//! ```

pub mod array;
pub mod bus;
pub mod notification;
pub mod reactive;
pub mod subscription;

pub use array::{ArrayChange, ArraySubject};
pub use bus::{Consumer, EventBus, Payload};
pub use notification::{
    Lifetime, Notification, NotificationCenter, NotificationConfig, NotificationId,
    NotificationKind,
};
pub use reactive::{Mapped, Observable, ReadOnly, Subject};
pub use subscription::{
    KeyAllocator, SubscriberKey, Subscription, SubscriptionSource, SubscriptionState,
};
