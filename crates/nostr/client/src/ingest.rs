//! Event ingestion into local storage.
//!
//! The pool delivers every arrival, so the same event seen on several relays
//! arrives several times. The ingestor is where that is resolved: it checks
//! each event, hands it to the [`EventStore`] and announces ids that were
//! newly stored.

use crate::error::Result;
use crate::listeners::{EventClass, Listener};
use crate::pool::RelayPool;
use crate::store::{EventStore, EventVerifier};
use nostr::{Event, validate_event, verify_event_id};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Listener name the ingestor registers on the pool.
pub const INGEST_LISTENER: &str = "event-ingestor";

/// Events buffered between the pool and a slow store before arrivals are dropped.
pub const INGEST_QUEUE_CAPACITY: usize = 4096;

/// Outcome of ingesting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Stored,
    Duplicate,
    Rejected,
}

/// Background task storing every event the pool delivers.
pub struct EventIngestor {
    last_event_id: watch::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

impl EventIngestor {
    /// Register on `pool` and start the ingestion task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        pool: &RelayPool,
        store: Arc<dyn EventStore>,
        verifier: Option<Arc<dyn EventVerifier>>,
    ) -> Self {
        Self::with_capacity(pool, store, verifier, INGEST_QUEUE_CAPACITY)
    }

    /// Like [`spawn`](Self::spawn) with an explicit queue bound.
    ///
    /// Events arriving while the queue is full are dropped and logged.
    pub fn with_capacity(
        pool: &RelayPool,
        store: Arc<dyn EventStore>,
        verifier: Option<Arc<dyn EventVerifier>>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Event>(capacity.max(1));
        pool.on(
            INGEST_LISTENER,
            Listener::event(move |relay, _, event| match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(
                        "Ingest queue full, dropping event {} from {}",
                        event.id,
                        relay.url()
                    );
                }
                // Receiver gone means the ingestor shut down.
                Err(TrySendError::Closed(_)) => {}
            }),
        );

        let (last_tx, last_event_id) = watch::channel(None);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match ingest(store.as_ref(), verifier.as_deref(), &event).await {
                    Ok(Ingested::Stored) => {
                        last_tx.send_replace(Some(event.id));
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to store event {}: {}", event.id, e),
                }
            }
            debug!("Event ingestor stopped");
        });

        Self {
            last_event_id,
            task,
        }
    }

    /// Id of the most recently stored event.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.borrow().clone()
    }

    /// Notified whenever a new event is stored; use it to re-read storage.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.last_event_id.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Unregister from `pool` and wait for queued events to drain.
    pub async fn shutdown(self, pool: &RelayPool) {
        pool.remove_on(EventClass::Event, INGEST_LISTENER);
        if let Err(e) = self.task.await {
            warn!("Event ingestor ended abnormally: {}", e);
        }
    }
}

/// Check and store one event.
pub async fn ingest(
    store: &dyn EventStore,
    verifier: Option<&dyn EventVerifier>,
    event: &Event,
) -> Result<Ingested> {
    if !validate_event(event) || !verify_event_id(event) {
        debug!("Dropping malformed event {}", event.id);
        return Ok(Ingested::Rejected);
    }
    if let Some(verifier) = verifier
        && !verifier.verify(event)
    {
        debug!("Dropping event {} with bad signature", event.id);
        return Ok(Ingested::Rejected);
    }

    if store.store_event(event).await? {
        Ok(Ingested::Stored)
    } else {
        Ok(Ingested::Duplicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::relay::RelayConnection;
    use crate::store::MemoryStore;
    use nostr::{Filter, UnsignedEvent, get_event_hash};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const PUBKEY: &str = "6e468422dfb74a5738702a8823b9b28168abab8655faacb6853cd0ee15deee93";

    fn signed(content: &str) -> Event {
        let unsigned = UnsignedEvent {
            pubkey: PUBKEY.to_string(),
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![],
            content: content.to_string(),
        };
        Event {
            id: get_event_hash(&unsigned).unwrap(),
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: "0".repeat(128),
        }
    }

    struct RejectAll;

    impl EventVerifier for RejectAll {
        fn verify(&self, _event: &Event) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_ingest_outcomes() {
        let store = MemoryStore::default();
        let event = signed("hello");

        assert_eq!(ingest(&store, None, &event).await.unwrap(), Ingested::Stored);
        assert_eq!(ingest(&store, None, &event).await.unwrap(), Ingested::Duplicate);

        let mut tampered = signed("other");
        tampered.content = "changed".to_string();
        assert_eq!(ingest(&store, None, &tampered).await.unwrap(), Ingested::Rejected);

        let mut malformed = signed("x");
        malformed.sig = "nothex".to_string();
        assert_eq!(ingest(&store, None, &malformed).await.unwrap(), Ingested::Rejected);

        assert_eq!(
            ingest(&store, Some(&RejectAll as &dyn EventVerifier), &signed("y")).await.unwrap(),
            Ingested::Rejected
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_ingestor_stores_pool_events_once() {
        let pool = RelayPool::new(PoolConfig::default());
        let store = Arc::new(MemoryStore::default());
        let ingestor = EventIngestor::spawn(&pool, store.clone(), None);
        let mut last = ingestor.subscribe();

        let a = RelayConnection::new("ws://127.0.0.1:1", Default::default()).unwrap();
        let b = RelayConnection::new("ws://127.0.0.1:2", Default::default()).unwrap();
        let event = signed("hello");
        pool.listeners().emit_event(&a, "main", &event);
        pool.listeners().emit_event(&b, "main", &event);

        tokio::time::timeout(Duration::from_secs(1), last.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ingestor.last_event_id(), Some(event.id.clone()));

        ingestor.shutdown(&pool).await;
        assert_eq!(store.query(&Filter::new()), vec![event]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_arrivals() {
        let pool = RelayPool::new(PoolConfig::default());
        let store = Arc::new(MemoryStore::default());
        let ingestor = EventIngestor::with_capacity(&pool, store.clone(), None, 1);

        // The task cannot run between these calls, so only the first fits.
        let relay = RelayConnection::new("ws://127.0.0.1:1", Default::default()).unwrap();
        let first = signed("first");
        for event in [first.clone(), signed("second"), signed("third")] {
            pool.listeners().emit_event(&relay, "main", &event);
        }

        ingestor.shutdown(&pool).await;
        assert_eq!(store.query(&Filter::new()), vec![first]);
    }
}
