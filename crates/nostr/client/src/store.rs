//! Collaborator interfaces consumed by the pool, and an in-memory store.
//!
//! The pool only delivers events. Persisting them, answering local queries,
//! remembering relays and handling keys belong to the embedding application,
//! which plugs in through these traits.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use nostr::{Event, Filter, is_addressable_kind, is_ephemeral_kind, is_replaceable_kind, sort_events};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Event persistence.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist an event. Returns `true` if it was not already stored.
    async fn store_event(&self, event: &Event) -> Result<bool>;

    /// Stored events matching `filter`, newest first, at most `filter.limit`.
    async fn query_events(&self, filter: &Filter) -> Result<Vec<Event>>;
}

/// Relay list persistence.
#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn store_relay(&self, url: &str) -> Result<()>;

    async fn list_relays(&self) -> Result<Vec<String>>;
}

/// Key handling. Keys are opaque hex strings to the client.
pub trait Identity: Send + Sync {
    fn public_key_from_private_key(&self, private_key: &str) -> Result<String>;
}

/// Signature verification.
pub trait EventVerifier: Send + Sync {
    /// `true` if `event.sig` is a valid signature of `event.id` by `event.pubkey`.
    fn verify(&self, event: &Event) -> bool;
}

fn default_max_events() -> usize {
    10_000
}

#[derive(Default)]
struct MemoryInner {
    /// Events by id, oldest insertion first
    events: IndexMap<String, Event>,
    /// Replaceable events by author + kind
    replaceable: HashMap<(String, u16), String>,
    /// Addressable events by author + kind + d-tag
    addressable: HashMap<(String, u16, String), String>,
    relays: IndexSet<String>,
}

impl MemoryInner {
    fn remove(&mut self, id: &str) {
        let Some(event) = self.events.shift_remove(id) else {
            return;
        };
        let d = d_tag(&event);
        let key = (event.pubkey.clone(), event.kind);
        if self.replaceable.get(&key).is_some_and(|current| current == id) {
            self.replaceable.remove(&key);
        }
        let key = (event.pubkey, event.kind, d);
        if self.addressable.get(&key).is_some_and(|current| current == id) {
            self.addressable.remove(&key);
        }
    }

    /// Whether `event` should replace the stored version with id `existing`.
    fn replaces(&self, existing: Option<&String>, event: &Event) -> bool {
        match existing.and_then(|id| self.events.get(id)) {
            None => true,
            // Newer wins; on equal timestamps the lowest id is kept.
            Some(old) => {
                event.created_at > old.created_at
                    || (event.created_at == old.created_at && event.id < old.id)
            }
        }
    }
}

fn d_tag(event: &Event) -> String {
    event.d_tag().unwrap_or_default().to_string()
}

/// In-memory [`EventStore`] and [`RelayStore`].
///
/// Deduplicates by id, keeps only the newest version of replaceable and
/// addressable events, skips ephemeral events and evicts the oldest insert
/// once full.
pub struct MemoryStore {
    max_events: usize,
    inner: Mutex<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(default_max_events())
    }
}

impl MemoryStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// Insert an event. Returns `true` if it was newly stored.
    pub fn insert(&self, event: &Event) -> bool {
        if is_ephemeral_kind(event.kind) {
            return false;
        }

        let mut inner = self.inner.lock();
        if inner.events.contains_key(&event.id) {
            return false;
        }

        let replaced = if is_replaceable_kind(event.kind) {
            let key = (event.pubkey.clone(), event.kind);
            let existing = inner.replaceable.get(&key).cloned();
            if !inner.replaces(existing.as_ref(), event) {
                return false;
            }
            inner.replaceable.insert(key, event.id.clone());
            existing
        } else if is_addressable_kind(event.kind) {
            let key = (event.pubkey.clone(), event.kind, d_tag(event));
            let existing = inner.addressable.get(&key).cloned();
            if !inner.replaces(existing.as_ref(), event) {
                return false;
            }
            inner.addressable.insert(key, event.id.clone());
            existing
        } else {
            None
        };

        if let Some(old_id) = replaced {
            inner.events.shift_remove(&old_id);
        }

        if inner.events.len() >= self.max_events
            && let Some(oldest) = inner.events.keys().next().cloned()
        {
            inner.remove(&oldest);
        }

        inner.events.insert(event.id.clone(), event.clone());
        true
    }

    pub fn get(&self, id: &str) -> Option<Event> {
        self.inner.lock().events.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().events.contains_key(id)
    }

    pub fn query(&self, filter: &Filter) -> Vec<Event> {
        let mut matched: Vec<Event> = self
            .inner
            .lock()
            .events
            .values()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        sort_events(&mut matched);
        if let Some(limit) = filter.limit {
            matched.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn store_event(&self, event: &Event) -> Result<bool> {
        Ok(self.insert(event))
    }

    async fn query_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        Ok(self.query(filter))
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn store_relay(&self, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(ClientError::Storage("empty relay url".to_string()));
        }
        self.inner.lock().relays.insert(url.to_string());
        Ok(())
    }

    async fn list_relays(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().relays.iter().cloned().collect())
    }
}
