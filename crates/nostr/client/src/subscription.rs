//! Per-connection subscription bookkeeping.
//!
//! A connection remembers the fingerprint of every `(channel, filters)` pair it
//! has already sent as a `REQ`, so issuing the same subscription again is a
//! no-op on the wire.

use crate::error::Result;
use nostr::Filter;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Stable hash of a channel name plus its serialized filter set.
///
/// Filters serialize with sorted tag keys, so two equal filter sets always
/// produce the same fingerprint. Filter order matters.
pub fn fingerprint(channel: &str, filters: &[Filter]) -> Result<String> {
    let serialized = serde_json::to_string(filters)?;
    let mut hasher = Sha256::new();
    hasher.update(channel.as_bytes());
    hasher.update([0u8]);
    hasher.update(serialized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Channel name to the fingerprints already sent for it.
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    channels: HashMap<String, HashSet<String>>,
}

impl SubscriptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fingerprint against a channel.
    ///
    /// Returns `false` when it was already recorded, i.e. the `REQ` must not
    /// be sent again.
    pub fn record(&mut self, channel: &str, fingerprint: String) -> bool {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(fingerprint)
    }

    /// Drop a single fingerprint, e.g. when the `REQ` could not be queued.
    pub fn forget(&mut self, channel: &str, fingerprint: &str) {
        if let Some(set) = self.channels.get_mut(channel) {
            set.remove(fingerprint);
            if set.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    /// Clear every fingerprint for a channel. Returns whether it was tracked.
    pub fn clear_channel(&mut self, channel: &str) -> bool {
        self.channels.remove(channel).is_some()
    }

    /// Forget everything (connection dropped).
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Channels with at least one active fingerprint.
    pub fn channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
