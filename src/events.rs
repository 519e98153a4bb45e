//! Subscription table for strip and brightness change notifications.
//!
//! Ids come from a per-registry counter, so they are unique for the lifetime
//! of the controller without any collision checks.
//!
//! The registry never catches panics from listeners. A panicking listener
//! stops the remaining listeners of that emission and unwinds into whoever
//! emitted: the caller of `set_brightness`, or the render thread (which
//! catches and logs it, see [`crate::render`]).

use crate::brightness::Brightness;
use crate::color::Color;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque handle returned by the `on_*` methods, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    StripChanged,
    BrightnessChanged,
}

type StripListener = Arc<dyn Fn(&[Color]) + Send + Sync>;
type BrightnessListener = Arc<dyn Fn(Brightness) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    StripChanged(StripListener),
    BrightnessChanged(BrightnessListener),
}

impl Listener {
    fn kind(&self) -> EventKind {
        match self {
            Self::StripChanged(_) => EventKind::StripChanged,
            Self::BrightnessChanged(_) => EventKind::BrightnessChanged,
        }
    }
}

/// Listeners keyed by id. `BTreeMap` iteration follows id order, which is
/// registration order.
#[derive(Default)]
pub struct EventRegistry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<SubscriptionId, Listener>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_strip_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[Color]) + Send + Sync + 'static,
    {
        self.insert(Listener::StripChanged(Arc::new(callback)))
    }

    pub fn on_brightness_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Brightness) + Send + Sync + 'static,
    {
        self.insert(Listener::BrightnessChanged(Arc::new(callback)))
    }

    /// Drop a subscription. Returns `false` if the id was unknown.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.table().remove(&id).is_some()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.table().values().filter(|l| l.kind() == kind).count()
    }

    pub fn emit_strip_changed(&self, strip: &[Color]) {
        for listener in self.snapshot(EventKind::StripChanged) {
            if let Listener::StripChanged(callback) = listener {
                callback(strip);
            }
        }
    }

    pub fn emit_brightness_changed(&self, brightness: Brightness) {
        for listener in self.snapshot(EventKind::BrightnessChanged) {
            if let Listener::BrightnessChanged(callback) = listener {
                callback(brightness);
            }
        }
    }

    fn insert(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table().insert(id, listener);
        id
    }

    /// Clone the matching listeners so the table lock is released before any
    /// callback runs; callbacks may subscribe or unsubscribe.
    fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        self.table()
            .values()
            .filter(|l| l.kind() == kind)
            .cloned()
            .collect()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, BTreeMap<SubscriptionId, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_are_unique_and_increasing() {
        let registry = EventRegistry::new();
        let a = registry.on_strip_changed(|_| {});
        let b = registry.on_brightness_changed(|_| {});
        let c = registry.on_strip_changed(|_| {});
        assert!(a < b && b < c);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let registry = EventRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let calls = calls.clone();
            registry.on_strip_changed(move |_| calls.lock().unwrap().push(name));
        }

        registry.emit_strip_changed(&[Color::BLACK]);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn events_only_reach_matching_kind() {
        let registry = EventRegistry::new();
        let strips = Arc::new(Mutex::new(Vec::new()));
        let levels = Arc::new(Mutex::new(Vec::new()));

        let s = strips.clone();
        registry.on_strip_changed(move |strip| s.lock().unwrap().push(strip.to_vec()));
        let l = levels.clone();
        registry.on_brightness_changed(move |b| l.lock().unwrap().push(b));

        registry.emit_brightness_changed(Brightness::Level(30));
        registry.emit_strip_changed(&[Color::new(1, 2, 3)]);

        assert_eq!(*strips.lock().unwrap(), vec![vec![Color::new(1, 2, 3)]]);
        assert_eq!(*levels.lock().unwrap(), vec![Brightness::Level(30)]);
        assert_eq!(registry.listener_count(EventKind::StripChanged), 1);
        assert_eq!(registry.listener_count(EventKind::BrightnessChanged), 1);
    }

    #[test]
    fn removed_listener_stops_firing() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = registry.on_strip_changed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit_strip_changed(&[]);
        assert!(registry.remove(id));
        registry.emit_strip_changed(&[]);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!registry.remove(id));
    }

    #[test]
    fn listener_can_unsubscribe_itself() {
        let registry = Arc::new(EventRegistry::new());
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));

        let (r, s) = (registry.clone(), slot.clone());
        let id = registry.on_strip_changed(move |_| {
            if let Some(id) = *s.lock().unwrap() {
                r.remove(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        registry.emit_strip_changed(&[]);
        assert_eq!(registry.listener_count(EventKind::StripChanged), 0);
    }
}
