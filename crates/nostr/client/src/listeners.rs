//! Named listener registry for pool callbacks.
//!
//! Each feature owns one slot per event class, keyed by name. Registering
//! under an existing name replaces the previous callback in place.

use crate::relay::RelayConnection;
use indexmap::IndexMap;
use nostr::Event;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub type EventCallback = Arc<dyn Fn(&RelayConnection, &str, &Event) + Send + Sync>;
pub type NoticeCallback = Arc<dyn Fn(&RelayConnection, &[Value]) + Send + Sync>;
pub type EoseCallback = Arc<dyn Fn(&RelayConnection, &str) + Send + Sync>;

/// The three classes of pool callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Event,
    Notice,
    Eose,
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventClass::Event => write!(f, "event"),
            EventClass::Notice => write!(f, "notice"),
            EventClass::Eose => write!(f, "eose"),
        }
    }
}

/// A callback for one event class.
#[derive(Clone)]
pub enum Listener {
    /// `(connection, subscription_id, event)`
    Event(EventCallback),
    /// `(connection, elements after the NOTICE tag)`
    Notice(NoticeCallback),
    /// `(connection, subscription_id)`
    Eose(EoseCallback),
}

impl Listener {
    pub fn event(f: impl Fn(&RelayConnection, &str, &Event) + Send + Sync + 'static) -> Self {
        Listener::Event(Arc::new(f))
    }

    pub fn notice(f: impl Fn(&RelayConnection, &[Value]) + Send + Sync + 'static) -> Self {
        Listener::Notice(Arc::new(f))
    }

    pub fn eose(f: impl Fn(&RelayConnection, &str) + Send + Sync + 'static) -> Self {
        Listener::Eose(Arc::new(f))
    }

    pub fn class(&self) -> EventClass {
        match self {
            Listener::Event(_) => EventClass::Event,
            Listener::Notice(_) => EventClass::Notice,
            Listener::Eose(_) => EventClass::Eose,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener::{}", self.class())
    }
}

#[derive(Default)]
struct Slots {
    event: IndexMap<String, EventCallback>,
    notice: IndexMap<String, NoticeCallback>,
    eose: IndexMap<String, EoseCallback>,
}

/// Name-keyed callbacks, invoked in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    slots: RwLock<Slots>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the listener called `name` for the listener's class.
    ///
    /// Returns `true` if an existing listener was replaced.
    pub fn on(&self, name: impl Into<String>, listener: Listener) -> bool {
        let name = name.into();
        let mut slots = self.slots.write();
        match listener {
            Listener::Event(cb) => slots.event.insert(name, cb).is_some(),
            Listener::Notice(cb) => slots.notice.insert(name, cb).is_some(),
            Listener::Eose(cb) => slots.eose.insert(name, cb).is_some(),
        }
    }

    /// Remove a listener. Unknown names are ignored.
    pub fn remove_on(&self, class: EventClass, name: &str) -> bool {
        let mut slots = self.slots.write();
        match class {
            EventClass::Event => slots.event.shift_remove(name).is_some(),
            EventClass::Notice => slots.notice.shift_remove(name).is_some(),
            EventClass::Eose => slots.eose.shift_remove(name).is_some(),
        }
    }

    pub fn contains(&self, class: EventClass, name: &str) -> bool {
        let slots = self.slots.read();
        match class {
            EventClass::Event => slots.event.contains_key(name),
            EventClass::Notice => slots.notice.contains_key(name),
            EventClass::Eose => slots.eose.contains_key(name),
        }
    }

    pub fn len(&self, class: EventClass) -> usize {
        let slots = self.slots.read();
        match class {
            EventClass::Event => slots.event.len(),
            EventClass::Notice => slots.notice.len(),
            EventClass::Eose => slots.eose.len(),
        }
    }

    // Callbacks run on a snapshot so they may register or remove listeners.

    pub fn emit_event(&self, relay: &RelayConnection, subscription_id: &str, event: &Event) {
        let callbacks: Vec<EventCallback> = self.slots.read().event.values().cloned().collect();
        for cb in callbacks {
            cb(relay, subscription_id, event);
        }
    }

    pub fn emit_notice(&self, relay: &RelayConnection, payload: &[Value]) {
        let callbacks: Vec<NoticeCallback> = self.slots.read().notice.values().cloned().collect();
        for cb in callbacks {
            cb(relay, payload);
        }
    }

    pub fn emit_eose(&self, relay: &RelayConnection, subscription_id: &str) {
        let callbacks: Vec<EoseCallback> = self.slots.read().eose.values().cloned().collect();
        for cb in callbacks {
            cb(relay, subscription_id);
        }
    }
}
