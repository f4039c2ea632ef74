//! Single relay connection management
//!
//! A [`RelayConnection`] owns one WebSocket to one relay URL. A background
//! driver task connects, reads inbound frames, flushes the outbox and
//! reconnects with capped exponential backoff until the connection is closed
//! on request.
//!
//! Frames sent before the socket is open are queued in a bounded outbox and
//! flushed once it opens. A frame whose write fails is kept and sent first on
//! the next open; frames still queued when the connection is closed on
//! request are discarded.

use crate::backoff::ExponentialBackoff;
use crate::config::RelayConfig;
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage, notice_text};
use crate::subscription::{SubscriptionLedger, fingerprint};
use futures::{Sink, SinkExt, Stream, StreamExt};
use nostr::{Event, Filter};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Socket open, outbox flushing
    Open,
    /// No socket. Reconnects unless closed on request or reconnect is off.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Receives everything a connection surfaces to its owner.
pub trait RelayObserver: Send + Sync {
    fn on_event(&self, relay: &RelayConnection, subscription_id: &str, event: &Event);

    /// `payload` holds every frame element after the `NOTICE` tag.
    fn on_notice(&self, relay: &RelayConnection, payload: &[Value]);

    fn on_eose(&self, relay: &RelayConnection, subscription_id: &str);

    fn on_state(&self, _relay: &RelayConnection, _state: ConnectionState) {}
}

/// Parse and validate a relay URL (`ws://` or `wss://` only).
///
/// Returns the normalized form used as the pool key.
pub fn normalize_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim())?;
    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(ClientError::InvalidUrl(format!("URL has no host: {}", url)));
    }
    Ok(parsed.to_string())
}

struct Inner {
    url: String,
    config: RelayConfig,
    state: watch::Sender<ConnectionState>,
    manual_close: AtomicBool,
    /// Bumped when a reopen supersedes a driver that is still winding down.
    generation: AtomicU64,
    ledger: Mutex<SubscriptionLedger>,
    outbox_tx: mpsc::Sender<String>,
    /// Held here while no driver runs; the driver takes it and hands it back.
    outbox_rx: Mutex<Option<mpsc::Receiver<String>>>,
    /// Frame whose write failed, resent before the outbox on the next open.
    carry: Mutex<Option<String>>,
    observer: RwLock<Option<Arc<dyn RelayObserver>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    shutdown: Notify,
}

/// Relay connection handle. Clones share the same socket.
#[derive(Clone)]
pub struct RelayConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl RelayConnection {
    /// Create a new relay connection (does not connect yet)
    pub fn new(url: &str, config: RelayConfig) -> Result<Self> {
        let url = normalize_url(url)?;
        let (outbox_tx, outbox_rx) = mpsc::channel(config.outbox_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Closed);

        Ok(Self {
            inner: Arc::new(Inner {
                url,
                config,
                state,
                manual_close: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                ledger: Mutex::new(SubscriptionLedger::new()),
                outbox_tx,
                outbox_rx: Mutex::new(Some(outbox_rx)),
                carry: Mutex::new(None),
                observer: RwLock::new(None),
                driver: Mutex::new(None),
                shutdown: Notify::new(),
            }),
        })
    }

    /// Get relay URL (normalized)
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Whether `close()` was called and not followed by `open()`
    pub fn is_manually_closed(&self) -> bool {
        self.inner.manual_close.load(Ordering::SeqCst)
    }

    /// Same underlying connection
    pub fn ptr_eq(&self, other: &RelayConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Route callbacks to `observer`, replacing any previous one.
    pub fn set_observer(&self, observer: Arc<dyn RelayObserver>) {
        *self.inner.observer.write() = Some(observer);
    }

    /// Stop delivering callbacks. Frames still in flight are dropped.
    pub fn detach(&self) {
        *self.inner.observer.write() = None;
    }

    /// Start the connection driver. No-op while a driver is already running.
    ///
    /// Reopening right after [`close`](Self::close) retires the driver that is
    /// still shutting down and starts a fresh one once it has finished.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self) {
        let mut driver = self.inner.driver.lock();
        let reopening = self.inner.manual_close.swap(false, Ordering::SeqCst);
        let previous = match driver.take() {
            Some(handle) if !handle.is_finished() => {
                if !reopening {
                    *driver = Some(handle);
                    return;
                }
                Some(handle)
            }
            _ => None,
        };
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.shutdown.notify_waiters();
        *driver = Some(tokio::spawn(start(self.clone(), previous, generation)));
    }

    /// Close the connection and suppress reconnection.
    ///
    /// A handshake already in flight is not cancelled; the driver observes the
    /// flag once it completes and stops.
    pub fn close(&self) {
        self.inner.manual_close.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_one();
        info!("Closing relay connection: {}", self.inner.url);
    }

    /// Wait for the driver task to finish.
    pub async fn join(&self) {
        let handle = self.inner.driver.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Relay driver for {} ended abnormally: {}", self.inner.url, e);
        }
    }

    /// Publish an event: `["EVENT", event]`
    pub fn send_event(&self, event: &Event) -> Result<()> {
        let frame = ClientMessage::Event(event.clone()).to_json()?;
        self.enqueue(frame)
    }

    /// Subscribe `channel` to `filters`.
    ///
    /// Returns `Ok(false)` without touching the wire when this exact
    /// channel and filter set is already active on this connection.
    pub fn subscribe(&self, channel: &str, filters: &[Filter]) -> Result<bool> {
        let fp = fingerprint(channel, filters)?;
        if !self.inner.ledger.lock().record(channel, fp.clone()) {
            debug!("Subscription {} already active on {}", channel, self.inner.url);
            return Ok(false);
        }

        let sent = ClientMessage::Req {
            subscription_id: channel.to_string(),
            filters: filters.to_vec(),
        }
        .to_json()
        .map_err(ClientError::from)
        .and_then(|frame| self.enqueue(frame));

        match sent {
            Ok(()) => Ok(true),
            Err(e) => {
                self.inner.ledger.lock().forget(channel, &fp);
                Err(e)
            }
        }
    }

    /// Close a subscription: `["CLOSE", channel]`. Clears its fingerprints.
    pub fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.inner.ledger.lock().clear_channel(channel);
        let frame = ClientMessage::Close {
            subscription_id: channel.to_string(),
        }
        .to_json()?;
        self.enqueue(frame)
    }

    /// Unsubscribe every channel tracked on this connection.
    pub fn unsubscribe_all(&self) -> Result<()> {
        let channels = self.inner.ledger.lock().channels();
        let mut result = Ok(());
        for channel in channels {
            if let Err(e) = self.unsubscribe(&channel) {
                result = Err(e);
            }
        }
        result
    }

    /// Channels with an active subscription on this connection
    pub fn active_subscriptions(&self) -> Vec<String> {
        self.inner.ledger.lock().channels()
    }

    pub fn has_subscription(&self, channel: &str) -> bool {
        self.inner.ledger.lock().contains(channel)
    }

    fn enqueue(&self, frame: String) -> Result<()> {
        if self.is_manually_closed() {
            return Err(ClientError::Closed(self.inner.url.clone()));
        }
        self.inner.outbox_tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ClientError::OutboxFull(self.inner.url.clone()),
            TrySendError::Closed(_) => ClientError::Closed(self.inner.url.clone()),
        })
    }

    /// Whether the driver started as `generation` should stop.
    fn retired(&self, generation: u64) -> bool {
        self.is_manually_closed() || self.inner.generation.load(Ordering::SeqCst) != generation
    }

    fn observer(&self) -> Option<Arc<dyn RelayObserver>> {
        self.inner.observer.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous == state {
            return;
        }
        debug!("Relay {} {} -> {}", self.inner.url, previous, state);
        if let Some(observer) = self.observer() {
            observer.on_state(self, state);
        }
    }

    /// Parse one inbound text frame and dispatch it. Malformed frames are dropped.
    pub(crate) fn handle_frame(&self, text: &str) {
        let msg = match RelayMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Dropping frame from {}: {}", self.inner.url, e);
                return;
            }
        };

        match msg {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if let Some(observer) = self.observer() {
                    observer.on_event(self, &subscription_id, &event);
                }
            }
            RelayMessage::Eose { subscription_id } => {
                if let Some(observer) = self.observer() {
                    observer.on_eose(self, &subscription_id);
                }
            }
            RelayMessage::Notice { payload } => {
                debug!("Notice from {}: {}", self.inner.url, notice_text(&payload));
                if let Some(observer) = self.observer() {
                    observer.on_notice(self, &payload);
                }
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                if success {
                    debug!("Relay {} accepted event {}", self.inner.url, event_id);
                } else {
                    warn!(
                        "Relay {} rejected event {}: {}",
                        self.inner.url, event_id, message
                    );
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                warn!(
                    "Relay {} closed subscription {}: {}",
                    self.inner.url, subscription_id, message
                );
                self.inner.ledger.lock().clear_channel(&subscription_id);
            }
            RelayMessage::Auth { .. } => {
                debug!("Ignoring AUTH challenge from {}", self.inner.url);
            }
        }
    }
}

/// Wait for a retired driver to hand back the outbox, then drive.
async fn start(relay: RelayConnection, previous: Option<JoinHandle<()>>, generation: u64) {
    if let Some(previous) = previous
        && let Err(e) = previous.await
    {
        warn!("Relay driver for {} ended abnormally: {}", relay.url(), e);
    }
    if relay.retired(generation) {
        return;
    }
    let Some(outbox) = relay.inner.outbox_rx.lock().take() else {
        warn!("Outbox for {} is gone; not reconnecting", relay.url());
        return;
    };
    drive(relay, outbox, generation).await;
}

/// Connection driver: connect, run a session, back off, repeat.
async fn drive(relay: RelayConnection, mut outbox: mpsc::Receiver<String>, generation: u64) {
    let inner = &relay.inner;
    let config = &inner.config;
    let mut backoff = ExponentialBackoff::new(
        config.reconnect_delay(),
        config.max_reconnect_delay(),
        config.max_reconnect_attempts,
    );
    let mut carry = inner.carry.lock().take();

    loop {
        if relay.retired(generation) {
            break;
        }

        relay.set_state(ConnectionState::Connecting);
        info!("Connecting to relay: {}", inner.url);

        match timeout(config.connect_timeout(), connect_async(inner.url.as_str())).await {
            Ok(Ok((ws, _))) => {
                if relay.retired(generation) {
                    let mut ws = ws;
                    let _ = ws.close(None).await;
                    break;
                }
                backoff.reset();
                relay.set_state(ConnectionState::Open);
                info!("Connected to relay: {}", inner.url);

                run_session(&relay, generation, ws, &mut outbox, &mut carry).await;

                // Subscriptions do not survive the socket.
                inner.ledger.lock().clear();
                info!("Disconnected from relay: {}", inner.url);
            }
            Ok(Err(e)) => warn!("Failed to connect to {}: {}", inner.url, e),
            Err(_) => warn!(
                "Connection timeout after {:?} for {}",
                config.connect_timeout(),
                inner.url
            ),
        }

        relay.set_state(ConnectionState::Closed);

        if relay.retired(generation) || !config.reconnect {
            break;
        }

        let Some(delay) = backoff.next_delay() else {
            warn!("Max reconnection attempts exhausted for {}", inner.url);
            break;
        };

        info!("Waiting {:?} before reconnecting to {}", delay, inner.url);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = inner.shutdown.notified() => {}
        }
    }

    relay.set_state(ConnectionState::Closed);
    if relay.is_manually_closed() {
        inner.ledger.lock().clear();
        while outbox.try_recv().is_ok() {}
    } else {
        *inner.carry.lock() = carry;
    }
    *inner.outbox_rx.lock() = Some(outbox);
}

/// Pump one open socket until it closes, errors, or the driver is retired.
///
/// A frame that fails to write is left in `carry` for the next session.
async fn run_session<S, E>(
    relay: &RelayConnection,
    generation: u64,
    socket: S,
    outbox: &mut mpsc::Receiver<String>,
    carry: &mut Option<String>,
) where
    S: Sink<Message, Error = E> + Stream<Item = std::result::Result<Message, E>>,
    E: fmt::Display,
{
    let url = relay.url();
    let (mut write, mut read) = socket.split();

    if let Some(text) = carry.take() {
        debug!("Resending to {}: {}", url, text);
        if let Err(e) = write.send(Message::Text(text.clone().into())).await {
            warn!("Failed to send to {}: {}", url, e);
            *carry = Some(text);
            return;
        }
    }

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => relay.handle_frame(text.as_str()),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!("WebSocket error from {}: {}", url, e);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Relay {} closed connection", url);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error from {}: {}", url, e);
                    break;
                }
                None => break,
            },
            outbound = outbox.recv() => {
                let Some(text) = outbound else {
                    break;
                };
                debug!("Sending to {}: {}", url, text);
                if let Err(e) = write.send(Message::Text(text.clone().into())).await {
                    warn!("Failed to send to {}: {}", url, e);
                    *carry = Some(text);
                    break;
                }
            }
            _ = relay.inner.shutdown.notified() => {
                if relay.retired(generation) {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
}
