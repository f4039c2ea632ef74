//! Nostr relay pool.
//!
//! This crate provides:
//! - One auto-reconnecting WebSocket connection per relay
//! - Message encoding and parsing (NIP-01 relay protocol)
//! - Per-connection deduplication of identical subscriptions
//! - A pool that fans requests out to every relay and fans callbacks back in
//!   to named listeners
//! - Publish confirmation tracking and event ingestion into local storage
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr::Filter;
//! use nostr_client::{Listener, PoolConfig, RelayPool};
//!
//! #[tokio::main]
//! async fn main() -> nostr_client::Result<()> {
//!     let pool = RelayPool::with_relays(
//!         PoolConfig::default(),
//!         ["wss://relay.damus.io", "wss://nos.lol"],
//!     )
//!     .await?;
//!
//!     pool.on(
//!         "feed",
//!         Listener::event(|relay, sub_id, event| {
//!             println!("{} {} {}", relay.url(), sub_id, event.id);
//!         }),
//!     );
//!
//!     pool.subscribe("main", &[Filter::new().kinds(vec![1]).limit(10)]).await;
//!     tokio::signal::ctrl_c().await?;
//!     pool.close_all().await;
//!     Ok(())
//! }
//! ```

mod backoff;
mod config;
mod confirmation;
mod context;
mod error;
mod ingest;
mod listeners;
mod message;
mod pool;
mod relay;
mod store;
mod subscription;

pub use backoff::ExponentialBackoff;
pub use config::{PoolConfig, RelayConfig, load_config, save_config};
pub use confirmation::{CONFIRMATION_LISTENER, Confirmation, ConfirmationTracker};
pub use context::NostrContext;
pub use error::{ClientError, Result};
pub use ingest::{EventIngestor, INGEST_LISTENER, INGEST_QUEUE_CAPACITY, Ingested, ingest};
pub use listeners::{EventClass, Listener, ListenerRegistry};
pub use message::{ClientMessage, MessageError, RelayMessage, notice_text};
pub use pool::{RelayPool, RelayStatus};
pub use relay::{ConnectionState, RelayConnection, RelayObserver, normalize_url};
pub use store::{EventStore, EventVerifier, Identity, MemoryStore, RelayStore};
pub use subscription::{SubscriptionLedger, fingerprint};

/// Default relays.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://nostr.wine",
];

/// Create a relay pool connected to [`DEFAULT_RELAYS`].
pub async fn default_pool() -> Result<RelayPool> {
    RelayPool::with_relays(PoolConfig::default(), DEFAULT_RELAYS).await
}
