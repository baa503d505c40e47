//! Transient notifications
//!
//! Short-lived messages ("METAR updated", "Flight plan import failed") shown
//! in a corner of the tablet. A definite notification counts its remaining
//! time down on every [`NotificationCenter::tick`] and disappears when it
//! reaches zero; hovering it (`set_paused(id, true)`) freezes the countdown.
//!
//! The active notifications live in an [`ArraySubject`], so the list
//! reconciler can render them directly.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::array::ArraySubject;
use crate::reactive::Subject;

/// Unique notification identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId(u64);

impl NotificationId {
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    pub fn label(self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }
}

/// How long a notification stays up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    /// Until dismissed
    Indefinite,
    /// Removed once this much unpaused time has elapsed
    Definite(Duration),
}

/// A single notification
///
/// Clones share the `remaining` and `paused` observables.
#[derive(Clone)]
pub struct Notification {
    id: NotificationId,
    kind: NotificationKind,
    text: Rc<str>,
    lifetime: Lifetime,
    remaining: Option<Subject<Duration>>,
    paused: Subject<bool>,
}

impl Notification {
    pub fn id(&self) -> NotificationId {
        self.id
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Live remaining time, `None` for indefinite notifications
    pub fn remaining(&self) -> Option<&Subject<Duration>> {
        self.remaining.as_ref()
    }

    pub fn paused(&self) -> &Subject<bool> {
        &self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }
}

impl PartialEq for Notification {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("text", &self.text)
            .field("remaining", &self.remaining.as_ref().map(Subject::get))
            .field("paused", &self.paused.get())
            .finish()
    }
}

/// Notification timing, the `[notifications]` config table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Period of the countdown ticker
    pub tick_interval_ms: u64,
    /// Lifespan used by [`NotificationCenter::show`]; 0 means indefinite
    pub default_lifespan_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            default_lifespan_ms: 5000,
        }
    }
}

impl NotificationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn default_lifetime(&self) -> Lifetime {
        match self.default_lifespan_ms {
            0 => Lifetime::Indefinite,
            ms => Lifetime::Definite(Duration::from_millis(ms)),
        }
    }
}

/// Owns the active notifications and their countdowns
pub struct NotificationCenter {
    active: ArraySubject<Notification>,
    next_id: Cell<u64>,
    default_lifetime: Lifetime,
}

impl NotificationCenter {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            active: ArraySubject::new(),
            next_id: Cell::new(1),
            default_lifetime: config.default_lifetime(),
        }
    }

    /// Show a notification with the configured default lifespan
    pub fn show(&self, kind: NotificationKind, text: impl Into<Rc<str>>) -> NotificationId {
        self.show_with(kind, text, self.default_lifetime)
    }

    pub fn show_with(
        &self,
        kind: NotificationKind,
        text: impl Into<Rc<str>>,
        lifetime: Lifetime,
    ) -> NotificationId {
        let id = NotificationId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let remaining = match lifetime {
            Lifetime::Indefinite => None,
            Lifetime::Definite(span) => Some(Subject::new(span)),
        };
        let notification = Notification {
            id,
            kind,
            text: text.into(),
            lifetime,
            remaining,
            paused: Subject::new(false),
        };
        tracing::debug!(%id, kind = kind.label(), text = notification.text(), "notification shown");
        self.active.push(notification);
        id
    }

    /// Remove a notification right away; false if it is already gone
    pub fn dismiss(&self, id: NotificationId) -> bool {
        let removed = self.active.remove_where(|n| n.id == id).is_some();
        if removed {
            tracing::debug!(%id, "notification dismissed");
        }
        removed
    }

    /// Freeze or unfreeze a countdown
    pub fn set_paused(&self, id: NotificationId, paused: bool) -> bool {
        match self.get(id) {
            Some(notification) => {
                notification.paused.set(paused);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: NotificationId) -> Option<Notification> {
        let index = self.active.position(|n| n.id == id)?;
        self.active.get(index)
    }

    /// Advance every unpaused countdown by `elapsed`
    ///
    /// Returns the ids removed in this tick, in display order.
    pub fn tick(&self, elapsed: Duration) -> Vec<NotificationId> {
        let expired: Vec<NotificationId> = self
            .active
            .get_array()
            .iter()
            .filter(|n| !n.paused.get())
            .filter_map(|n| {
                let remaining = n.remaining.as_ref()?;
                let left = remaining.get().saturating_sub(elapsed);
                remaining.set(left);
                left.is_zero().then_some(n.id)
            })
            .collect();

        for id in &expired {
            if self.active.remove_where(|n| n.id == *id).is_some() {
                tracing::trace!(%id, "notification expired");
            }
        }
        expired
    }

    /// The active notifications, for rendering
    pub fn active(&self) -> &ArraySubject<Notification> {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(&NotificationConfig::default())
    }
}

impl fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("active", &self.active.len())
            .field("default_lifetime", &self.default_lifetime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayChange;
    use std::cell::RefCell;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_countdown_removes_exactly_once() {
        let center = NotificationCenter::default();
        let id = center.show_with(
            NotificationKind::Info,
            "METAR updated",
            Lifetime::Definite(Duration::from_millis(1000)),
        );
        let remaining = center.get(id).and_then(|n| n.remaining().cloned()).unwrap();

        let removals = Rc::new(Cell::new(0));
        let sink = Rc::clone(&removals);
        let _sub = center.active().sub(
            move |change, _| {
                if matches!(change, ArrayChange::Removed { .. }) {
                    sink.set(sink.get() + 1);
                }
            },
            false,
        );

        for _ in 0..999 {
            assert!(center.tick(MS).is_empty());
        }
        assert_eq!(remaining.get(), MS);
        assert_eq!(center.len(), 1);

        assert_eq!(center.tick(MS), vec![id]);
        assert_eq!(remaining.get(), Duration::ZERO);
        assert!(center.is_empty());

        center.tick(MS);
        assert_eq!(removals.get(), 1);
    }

    #[test]
    fn test_pause_freezes_countdown() {
        let center = NotificationCenter::default();
        let id = center.show_with(
            NotificationKind::Warning,
            "Low fuel",
            Lifetime::Definite(Duration::from_millis(1000)),
        );
        let remaining = center.get(id).and_then(|n| n.remaining().cloned()).unwrap();

        for _ in 0..400 {
            center.tick(MS);
        }
        assert!(center.set_paused(id, true));
        for _ in 0..1000 {
            center.tick(MS);
        }
        assert_eq!(remaining.get(), Duration::from_millis(600));
        assert_eq!(center.len(), 1);

        center.set_paused(id, false);
        center.tick(Duration::from_millis(600));
        assert!(center.is_empty());
    }

    #[test]
    fn test_indefinite_stays_until_dismissed() {
        let center = NotificationCenter::default();
        let id = center.show_with(NotificationKind::Error, "Import failed", Lifetime::Indefinite);
        assert!(center.get(id).is_some_and(|n| n.remaining().is_none()));

        center.tick(Duration::from_secs(3600));
        assert_eq!(center.len(), 1);

        assert!(center.dismiss(id));
        assert!(!center.dismiss(id));
        assert!(!center.set_paused(id, true));
        assert!(center.is_empty());
    }

    #[test]
    fn test_large_tick_saturates() {
        let center = NotificationCenter::default();
        let short = center.show_with(
            NotificationKind::Success,
            "Saved",
            Lifetime::Definite(Duration::from_millis(10)),
        );
        let long = center.show(NotificationKind::Info, "Default lifespan");

        assert_eq!(center.tick(Duration::from_millis(50)), vec![short]);
        let left = center.get(long).and_then(|n| n.remaining().map(Subject::get));
        assert_eq!(left, Some(Duration::from_millis(4950)));
    }

    #[test]
    fn test_remaining_is_observable() {
        let center = NotificationCenter::default();
        let id = center.show_with(
            NotificationKind::Info,
            "Tick",
            Lifetime::Definite(Duration::from_millis(3)),
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = center
            .get(id)
            .and_then(|n| n.remaining().cloned())
            .unwrap()
            .sub(move |left| sink.borrow_mut().push(left.as_millis()), false);

        center.tick(MS);
        center.tick(MS);
        center.tick(MS);
        assert_eq!(*seen.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn test_config_defaults() {
        let config: NotificationConfig = toml::from_str("tick_interval_ms = 50").unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(
            config.default_lifetime(),
            Lifetime::Definite(Duration::from_millis(5000))
        );

        let config: NotificationConfig = toml::from_str("default_lifespan_ms = 0").unwrap();
        assert_eq!(config.default_lifetime(), Lifetime::Indefinite);
    }
}
