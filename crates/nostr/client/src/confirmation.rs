//! Publish confirmation tracking.
//!
//! A published event counts as confirmed once any relay echoes an event with
//! the same id back on a subscription. The tracker watches the pool's `event`
//! stream, resolves waiters and publishes the last confirmed id.

use crate::error::{ClientError, Result};
use crate::listeners::{EventClass, Listener};
use crate::pool::RelayPool;
use nostr::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info};

/// Listener name the tracker registers on the pool.
pub const CONFIRMATION_LISTENER: &str = "confirmation-tracker";

const EXPIRED_CAPACITY: usize = 256;

struct Pending {
    /// Last time the id was tracked; expiry counts from here.
    since: Instant,
    waiters: Vec<oneshot::Sender<String>>,
}

struct Shared {
    timeout: Duration,
    pending: Mutex<HashMap<String, Pending>>,
    expired: broadcast::Sender<String>,
}

impl Shared {
    /// Drop `id` if it has been pending for the full timeout.
    fn expire_if_due(&self, id: &str) -> bool {
        let mut pending = self.pending.lock();
        let due = pending
            .get(id)
            .is_some_and(|p| p.since.elapsed() >= self.timeout);
        if due {
            pending.remove(id);
            drop(pending);
            debug!("Confirmation for {} expired", id);
            let _ = self.expired.send(id.to_string());
        }
        due
    }
}

/// Tracks sent events until a relay echoes them back.
///
/// Each tracked id expires on its own after the timeout, whether or not
/// anyone waits on its [`Confirmation`]. Expired ids are announced on
/// [`subscribe_expired`](Self::subscribe_expired).
pub struct ConfirmationTracker {
    shared: Arc<Shared>,
    last_confirmed: watch::Sender<Option<String>>,
}

impl ConfirmationTracker {
    pub fn new(timeout: Duration) -> Self {
        let (last_confirmed, _) = watch::channel(None);
        let (expired, _) = broadcast::channel(EXPIRED_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                timeout,
                pending: Mutex::new(HashMap::new()),
                expired,
            }),
            last_confirmed,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// Observe the pool's `event` stream under [`CONFIRMATION_LISTENER`].
    pub fn attach(self: &Arc<Self>, pool: &RelayPool) {
        let tracker = Arc::clone(self);
        pool.on(
            CONFIRMATION_LISTENER,
            Listener::event(move |_, _, event| {
                tracker.observe(event);
            }),
        );
    }

    pub fn detach(&self, pool: &RelayPool) {
        pool.remove_on(EventClass::Event, CONFIRMATION_LISTENER);
    }

    /// Mark `id` as pending and get a handle that resolves when it is echoed.
    ///
    /// Tracking an id that is already pending restarts its timeout. Outside a
    /// tokio runtime no expiry timer is scheduled; call
    /// [`expire_stale`](Self::expire_stale) instead.
    pub fn track(&self, id: impl Into<String>) -> Confirmation {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        {
            let mut pending = self.shared.pending.lock();
            let entry = pending.entry(id.clone()).or_insert_with(|| Pending {
                since: now,
                waiters: Vec::new(),
            });
            entry.since = now;
            entry.waiters.push(tx);
        }
        self.schedule_expiry(&id);

        Confirmation {
            id,
            rx,
            deadline: now + self.shared.timeout,
            shared: Arc::clone(&self.shared),
        }
    }

    fn schedule_expiry(&self, id: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let timeout = self.shared.timeout;
        let id = id.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire_if_due(&id);
            }
        });
    }

    /// Stop tracking `id`. Its waiters resolve with a timeout error.
    pub fn forget(&self, id: &str) -> bool {
        self.shared.pending.lock().remove(id).is_some()
    }

    /// Track, then publish through `pool`.
    ///
    /// The id is pending before dispatch so a fast echo cannot be missed. If
    /// the dispatch fails the id is dropped again and the error returned.
    pub async fn publish(&self, pool: &RelayPool, event: Event) -> Result<Confirmation> {
        let confirmation = self.track(event.id.clone());
        if let Err(e) = pool.send_event(event).await {
            self.forget(confirmation.id());
            return Err(e);
        }
        Ok(confirmation)
    }

    /// Feed an inbound event. Returns `true` if it confirmed a pending id.
    pub fn observe(&self, event: &Event) -> bool {
        let Some(pending) = self.shared.pending.lock().remove(&event.id) else {
            return false;
        };
        for waiter in pending.waiters {
            let _ = waiter.send(event.id.clone());
        }
        self.last_confirmed.send_replace(Some(event.id.clone()));
        info!("Event {} confirmed", event.id);
        true
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.shared.pending.lock().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// The most recently confirmed id.
    pub fn last_confirmed(&self) -> Option<String> {
        self.last_confirmed.borrow().clone()
    }

    /// Notified whenever the last confirmed id changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.last_confirmed.subscribe()
    }

    /// Ids that timed out without an echo.
    pub fn subscribe_expired(&self) -> broadcast::Receiver<String> {
        self.shared.expired.subscribe()
    }

    /// Drop entries pending longer than the timeout. Returns their ids.
    pub fn expire_stale(&self) -> Vec<String> {
        let stale: Vec<String> = self
            .shared
            .pending
            .lock()
            .iter()
            .filter(|(_, p)| p.since.elapsed() >= self.shared.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        stale
            .into_iter()
            .filter(|id| self.shared.expire_if_due(id))
            .collect()
    }
}

/// Resolves with the event id once a relay echoes it.
pub struct Confirmation {
    id: String,
    rx: oneshot::Receiver<String>,
    deadline: Instant,
    shared: Arc<Shared>,
}

impl Confirmation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the echo.
    ///
    /// Fails with [`ClientError::Timeout`] once the tracker's timeout has
    /// passed since this handle was created, or as soon as the id stops
    /// being tracked. Other handles for the same id keep waiting.
    pub async fn wait(self) -> Result<String> {
        let Confirmation {
            id,
            rx,
            deadline,
            shared,
        } = self;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(_)) => Err(ClientError::Timeout(format!(
                "confirmation for {} abandoned",
                id
            ))),
            Err(_) => {
                if !shared.expire_if_due(&id) {
                    // Someone re-tracked the id; drop only waiters nobody holds.
                    if let Some(pending) = shared.pending.lock().get_mut(&id) {
                        pending.waiters.retain(|waiter| !waiter.is_closed());
                    }
                }
                Err(ClientError::Timeout(format!(
                    "no relay echoed {} within {:?}",
                    id, shared.timeout
                )))
            }
        }
    }
}
