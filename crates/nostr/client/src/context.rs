//! Explicitly constructed client context.
//!
//! Bundles the pool with its collaborators so UI code gets one handle
//! instead of reaching for globals: relay list and event storage, the user's
//! public key, publish confirmation and ingestion.

use crate::config::PoolConfig;
use crate::confirmation::{Confirmation, ConfirmationTracker};
use crate::error::{ClientError, Result};
use crate::ingest::EventIngestor;
use crate::pool::RelayPool;
use crate::relay::normalize_url;
use crate::store::{EventStore, EventVerifier, Identity, RelayStore};
use nostr::{Event, Filter, validate_event};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::info;

pub struct NostrContext {
    pool: Arc<RelayPool>,
    events: Arc<dyn EventStore>,
    relays: Arc<dyn RelayStore>,
    confirmations: Arc<ConfirmationTracker>,
    ingestor: EventIngestor,
    public_key: Option<String>,
}

impl NostrContext {
    /// Build the pool from the persisted relay list and start ingestion.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(
        config: PoolConfig,
        events: Arc<dyn EventStore>,
        relays: Arc<dyn RelayStore>,
        verifier: Option<Arc<dyn EventVerifier>>,
    ) -> Result<Self> {
        let confirmations = Arc::new(ConfirmationTracker::new(config.confirmation_timeout()));
        let pool = Arc::new(RelayPool::from_store(config, relays.as_ref()).await?);
        confirmations.attach(&pool);
        let ingestor = EventIngestor::spawn(&pool, Arc::clone(&events), verifier);

        info!("Nostr context ready with {} relays", pool.len().await);
        Ok(Self {
            pool,
            events,
            relays,
            confirmations,
            ingestor,
            public_key: None,
        })
    }

    /// Derive and remember the user's public key.
    pub fn with_identity(mut self, identity: &dyn Identity, private_key: &str) -> Result<Self> {
        self.public_key = Some(identity.public_key_from_private_key(private_key)?);
        Ok(self)
    }

    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    pub fn confirmations(&self) -> &Arc<ConfirmationTracker> {
        &self.confirmations
    }

    /// Persist a relay and add it to the pool.
    pub async fn add_relay(&self, url: &str) -> Result<bool> {
        let url = normalize_url(url)?;
        self.relays.store_relay(&url).await?;
        self.pool.add(&url).await
    }

    pub async fn remove_relay(&self, url: &str) -> bool {
        self.pool.remove(url).await
    }

    pub async fn subscribe(&self, channel: &str, filters: &[Filter]) -> usize {
        self.pool.subscribe(channel, filters).await
    }

    pub async fn unsubscribe(&self, channels: &[&str]) {
        self.pool.unsubscribe(channels).await
    }

    /// Publish a signed event and get a handle that resolves once it is echoed.
    ///
    /// Rejects structurally invalid events and, when an identity is set,
    /// events authored by someone else.
    pub async fn publish(&self, event: Event) -> Result<Confirmation> {
        if !validate_event(&event) {
            return Err(ClientError::InvalidEvent(format!("malformed event {}", event.id)));
        }
        if let Some(pubkey) = &self.public_key
            && &event.pubkey != pubkey
        {
            return Err(ClientError::InvalidEvent(format!(
                "event {} not authored by {}",
                event.id, pubkey
            )));
        }
        self.confirmations.publish(&self.pool, event).await
    }

    /// Read local storage.
    pub async fn query(&self, filter: &Filter) -> Result<Vec<Event>> {
        self.events.query_events(filter).await
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.ingestor.last_event_id()
    }

    /// Notified whenever a new event lands in storage.
    pub fn watch_events(&self) -> watch::Receiver<Option<String>> {
        self.ingestor.subscribe()
    }

    pub fn last_confirmed(&self) -> Option<String> {
        self.confirmations.last_confirmed()
    }

    /// Notified whenever a published event is confirmed.
    pub fn watch_confirmations(&self) -> watch::Receiver<Option<String>> {
        self.confirmations.subscribe()
    }

    /// Ids whose publish timed out without an echo.
    pub fn watch_expired(&self) -> broadcast::Receiver<String> {
        self.confirmations.subscribe_expired()
    }

    /// Stop ingestion and close every relay.
    pub async fn shutdown(self) {
        self.confirmations.detach(&self.pool);
        self.ingestor.shutdown(&self.pool).await;
        self.pool.close_all().await;
    }
}
