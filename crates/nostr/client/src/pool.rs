//! Relay pool for managing connections to multiple Nostr relays.
//!
//! The pool fans subscribe, unsubscribe and publish calls out to every member
//! connection and fans their `event`, `notice` and `eose` callbacks back in to
//! one set of named listeners. Events are delivered once per arrival; the same
//! event seen on two relays reaches every listener twice.

use crate::config::PoolConfig;
use crate::error::{ClientError, Result};
use crate::listeners::{EventClass, Listener, ListenerRegistry};
use crate::relay::{ConnectionState, RelayConnection, RelayObserver, normalize_url};
use crate::store::RelayStore;
use indexmap::IndexMap;
use nostr::{Event, Filter};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

/// A member connection changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    pub url: String,
    pub state: ConnectionState,
}

/// Observer installed on every member connection.
struct FanIn {
    listeners: Arc<ListenerRegistry>,
    status_tx: broadcast::Sender<RelayStatus>,
}

impl RelayObserver for FanIn {
    fn on_event(&self, relay: &RelayConnection, subscription_id: &str, event: &Event) {
        self.listeners.emit_event(relay, subscription_id, event);
    }

    fn on_notice(&self, relay: &RelayConnection, payload: &[Value]) {
        self.listeners.emit_notice(relay, payload);
    }

    fn on_eose(&self, relay: &RelayConnection, subscription_id: &str) {
        self.listeners.emit_eose(relay, subscription_id);
    }

    fn on_state(&self, relay: &RelayConnection, state: ConnectionState) {
        // No receivers is fine.
        let _ = self.status_tx.send(RelayStatus {
            url: relay.url().to_string(),
            state,
        });
    }
}

/// A pool of Nostr relay connections.
pub struct RelayPool {
    config: PoolConfig,
    /// Connections indexed by normalized URL, in insertion order
    connections: RwLock<IndexMap<String, RelayConnection>>,
    fan_in: Arc<FanIn>,
}

impl RelayPool {
    /// Create an empty pool. `config.relays` is not consulted; see [`RelayPool::from_config`].
    pub fn new(config: PoolConfig) -> Self {
        let (status_tx, _) = broadcast::channel(config.status_capacity.max(1));
        Self {
            config,
            connections: RwLock::new(IndexMap::new()),
            fan_in: Arc::new(FanIn {
                listeners: Arc::new(ListenerRegistry::new()),
                status_tx,
            }),
        }
    }

    /// Create a pool and add every relay in `config.relays`.
    pub async fn from_config(config: PoolConfig) -> Result<Self> {
        let relays = config.relays.clone();
        Self::with_relays(config, relays).await
    }

    /// Create a pool connected to `relays`. Fails on the first invalid URL.
    pub async fn with_relays(
        config: PoolConfig,
        relays: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let pool = Self::new(config);
        for url in relays {
            pool.add(url.as_ref()).await?;
        }
        Ok(pool)
    }

    /// Create a pool from the persisted relay list. Invalid stored URLs are skipped.
    pub async fn from_store(config: PoolConfig, store: &dyn RelayStore) -> Result<Self> {
        let pool = Self::new(config);
        for url in store.list_relays().await? {
            if let Err(e) = pool.add(&url).await {
                warn!("Skipping stored relay {}: {}", url, e);
            }
        }
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Add a relay and start connecting.
    ///
    /// Returns `Ok(false)` if the relay is already a member. An unreachable
    /// relay is not an error; it keeps retrying in the background.
    pub async fn add(&self, url: &str) -> Result<bool> {
        let url = normalize_url(url)?;
        let mut conns = self.connections.write().await;
        if conns.contains_key(&url) {
            debug!("Relay already in pool: {}", url);
            return Ok(false);
        }

        let conn = RelayConnection::new(&url, self.config.relay.clone())?;
        conn.set_observer(self.fan_in.clone());
        conn.open();
        conns.insert(url.clone(), conn);

        info!("Added relay to pool: {}", url);
        Ok(true)
    }

    /// Close and discard the connection for `url`.
    ///
    /// The connection is detached before it is closed, so frames still in
    /// flight on the old socket reach no listener.
    pub async fn remove(&self, url: &str) -> bool {
        let Ok(url) = normalize_url(url) else {
            return false;
        };
        let removed = self.connections.write().await.shift_remove(&url);
        match removed {
            Some(conn) => {
                conn.detach();
                conn.close();
                info!("Removed relay from pool: {}", url);
                true
            }
            None => false,
        }
    }

    /// Subscribe every member connection.
    ///
    /// Returns how many connections sent a new `REQ`; connections that already
    /// carry this exact subscription do not count.
    pub async fn subscribe(&self, channel: &str, filters: &[Filter]) -> usize {
        let conns = self.connections.read().await;
        let mut sent = 0;
        for conn in conns.values() {
            match conn.subscribe(channel, filters) {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to subscribe {} on {}: {}", channel, conn.url(), e),
            }
        }
        sent
    }

    /// Close `channels` on every member connection.
    pub async fn unsubscribe(&self, channels: &[&str]) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            for channel in channels {
                if let Err(e) = conn.unsubscribe(channel) {
                    warn!("Failed to unsubscribe {} on {}: {}", channel, conn.url(), e);
                }
            }
        }
    }

    /// Close every tracked channel on every member connection.
    pub async fn unsubscribe_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            if let Err(e) = conn.unsubscribe_all() {
                warn!("Failed to unsubscribe all on {}: {}", conn.url(), e);
            }
        }
    }

    /// Publish to every member connection.
    ///
    /// Resolves once the event is dispatched, not once a relay confirms it.
    /// With no members this is a successful no-op. Fails only when every
    /// member refused the send.
    pub async fn send_event(&self, event: Event) -> Result<Event> {
        let conns = self.connections.read().await;
        if conns.is_empty() {
            debug!("No relays in pool, event {} not sent", event.id);
            return Ok(event);
        }

        let mut failures = Vec::new();
        for conn in conns.values() {
            if let Err(e) = conn.send_event(&event) {
                warn!("Failed to send event {} to {}: {}", event.id, conn.url(), e);
                failures.push(format!("{}: {}", conn.url(), e));
            }
        }

        if failures.len() == conns.len() {
            return Err(ClientError::PublishFailed(failures.join("; ")));
        }
        Ok(event)
    }

    /// Register or replace the named listener for the listener's class.
    pub fn on(&self, name: impl Into<String>, listener: Listener) -> bool {
        self.fan_in.listeners.on(name, listener)
    }

    /// Remove a named listener. Unknown names are ignored.
    pub fn remove_on(&self, class: EventClass, name: &str) -> bool {
        self.fan_in.listeners.remove_on(class, name)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.fan_in.listeners
    }

    /// Connection state changes of every member.
    pub fn status_events(&self) -> broadcast::Receiver<RelayStatus> {
        self.fan_in.status_tx.subscribe()
    }

    /// Get all relay URLs in the pool, in insertion order.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn has_relay(&self, url: &str) -> bool {
        match normalize_url(url) {
            Ok(url) => self.connections.read().await.contains_key(&url),
            Err(_) => false,
        }
    }

    pub async fn connection(&self, url: &str) -> Option<RelayConnection> {
        let url = normalize_url(url).ok()?;
        self.connections.read().await.get(&url).cloned()
    }

    /// Get connection states for all relays.
    pub async fn states(&self) -> IndexMap<String, ConnectionState> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(url, conn)| (url.clone(), conn.state()))
            .collect()
    }

    /// Number of connections currently open.
    pub async fn connected_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.is_open())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Detach and close every connection and empty the pool.
    pub async fn close_all(&self) {
        let conns: Vec<RelayConnection> = {
            let mut conns = self.connections.write().await;
            conns.drain(..).map(|(_, conn)| conn).collect()
        };
        for conn in &conns {
            conn.detach();
            conn.close();
        }
        for conn in &conns {
            conn.join().await;
        }
        info!("Closed {} relay connections", conns.len());
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        for conn in self.connections.get_mut().values() {
            conn.detach();
            conn.close();
        }
    }
}
