//! Nostr protocol data model.
//!
//! This crate provides:
//! - NIP-01: the signed [`Event`] record, canonical serialization, id hashing
//!   and structural validation
//! - NIP-01: the [`Filter`] query record shared by relay subscriptions and
//!   local storage lookups
//!
//! Key handling is out of scope: signing and signature verification are
//! supplied by the embedding application.

mod filter;
mod nip01;

pub use filter::Filter;
pub use nip01::{
    Event, KIND_CONTACTS, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_EVENT_DELETION, KIND_METADATA,
    KIND_REACTION, KIND_RECOMMEND_RELAY, KIND_RELAY_LIST_METADATA, KIND_REPOST,
    KIND_SHORT_TEXT_NOTE, KindClassification, Nip01Error, UnsignedEvent, classify_kind,
    get_event_hash, is_addressable_kind, is_ephemeral_kind, is_regular_kind, is_replaceable_kind,
    serialize_event, sort_events, validate_event, validate_unsigned_event, verify_event_id,
};
