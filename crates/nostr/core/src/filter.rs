//! NIP-01 subscription filters.
//!
//! A filter is plain data. The same record is sent to relays inside
//! `["REQ", <subscription_id>, <filter>...]` and evaluated locally against
//! stored events with [`Filter::matches`]. It supports:
//! - Event IDs (or prefixes)
//! - Authors/pubkeys (or prefixes)
//! - Event kinds
//! - Time ranges (since/until, both inclusive)
//! - Tag queries (#e, #p, etc.)
//! - Result limits
//!
//! Tag filters live in a `BTreeMap`, so serializing the same filter always
//! yields the same bytes.

use crate::nip01::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// NIP-01 Filter for subscription requests and local queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs (or prefixes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys or prefixes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Generic tag queries. Keys include the `#` prefix (e.g. `"#e"`).
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,

    /// Events created at or after this timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events created at or before this timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events to return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Filter {
    /// Create a new empty filter (matches all events).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event IDs.
    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Filter by authors.
    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    /// Filter by kinds.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Events created at or after `timestamp`.
    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Events created at or before `timestamp`.
    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag filter. Accepts either `"e"` or `"#e"`.
    pub fn tag(mut self, tag_name: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let key = if tag_name.starts_with('#') {
            tag_name.to_string()
        } else {
            format!("#{}", tag_name)
        };
        self.tags
            .insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    /// Filter by #e (event reference) tags.
    pub fn event_refs(self, event_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("e", event_ids)
    }

    /// Filter by #p (pubkey reference) tags.
    pub fn pubkey_refs(self, pubkeys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref ids) = self.ids
            && !ids.iter().any(|id| event.id.starts_with(id.as_str()))
        {
            return false;
        }

        if let Some(ref authors) = self.authors
            && !authors.iter().any(|a| event.pubkey.starts_with(a.as_str()))
        {
            return false;
        }

        if let Some(ref kinds) = self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }

        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }

        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(key, values)| {
            // Only single-letter `#x` keys are tag queries.
            let Some(name) = key.strip_prefix('#') else {
                return true;
            };
            event
                .tag_values(name)
                .any(|value| values.iter().any(|v| v == value))
        })
    }

    /// Check if an event matches any of the filters (a relay returns the union).
    pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
        filters.iter().any(|filter| filter.matches(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(id: &str, pubkey: &str, kind: u16, created_at: u64, tags: Vec<Vec<&str>>) -> Event {
        Event {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            created_at,
            kind,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(str::to_string).collect())
                .collect(),
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_filter_builder() {
        let filter = Filter::new()
            .kinds(vec![1, 4])
            .authors(vec!["author1"])
            .since(1000)
            .until(2000)
            .limit(100)
            .event_refs(vec!["event1"]);

        assert_eq!(filter.kinds, Some(vec![1, 4]));
        assert_eq!(filter.authors, Some(vec!["author1".to_string()]));
        assert_eq!(filter.since, Some(1000));
        assert_eq!(filter.until, Some(2000));
        assert_eq!(filter.limit, Some(100));
        assert!(filter.tags.contains_key("#e"));
    }

    #[test]
    fn test_filter_wire_form() {
        let filter = Filter::new().kinds(vec![1]);
        assert_eq!(serde_json::to_string(&filter).unwrap(), r#"{"kinds":[1]}"#);

        let filter = Filter::new()
            .pubkey_refs(vec!["pk"])
            .event_refs(vec!["ev"])
            .kinds(vec![7])
            .limit(10);
        assert_eq!(
            serde_json::to_string(&filter).unwrap(),
            r##"{"kinds":[7],"#e":["ev"],"#p":["pk"],"limit":10}"##
        );
    }

    #[test]
    fn test_filter_serialization_is_order_independent() {
        let a = Filter::new().tag("p", vec!["x"]).tag("e", vec!["y"]);
        let b = Filter::new().tag("#e", vec!["y"]).tag("#p", vec!["x"]);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_filter_deserialize_tags() {
        let filter: Filter =
            serde_json::from_str(r##"{"kinds":[1,6],"#p":["abc"],"since":5}"##).unwrap();
        assert_eq!(filter.kinds, Some(vec![1, 6]));
        assert_eq!(filter.since, Some(5));
        assert_eq!(filter.tags.get("#p"), Some(&vec!["abc".to_string()]));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().matches(&event("id", "pk", 1, 1, vec![])));
    }

    #[test]
    fn test_matches_ids_and_authors_by_prefix() {
        let ev = event("abcdef", "123456", 1, 100, vec![]);
        assert!(Filter::new().ids(vec!["abc"]).matches(&ev));
        assert!(!Filter::new().ids(vec!["abd"]).matches(&ev));
        assert!(Filter::new().authors(vec!["123"]).matches(&ev));
        assert!(!Filter::new().authors(vec!["999"]).matches(&ev));
    }

    #[test]
    fn test_matches_time_bounds_inclusive() {
        let ev = event("id", "pk", 1, 100, vec![]);
        assert!(Filter::new().since(100).matches(&ev));
        assert!(!Filter::new().since(101).matches(&ev));
        assert!(Filter::new().until(100).matches(&ev));
        assert!(!Filter::new().until(99).matches(&ev));
    }

    #[test]
    fn test_matches_tags() {
        let ev = event("id", "pk", 7, 1, vec![vec!["e", "note1"], vec!["p", "alice"]]);
        assert!(Filter::new().event_refs(vec!["note1"]).matches(&ev));
        assert!(Filter::new()
            .event_refs(vec!["other", "note1"])
            .pubkey_refs(vec!["alice"])
            .matches(&ev));
        assert!(!Filter::new()
            .event_refs(vec!["note1"])
            .pubkey_refs(vec!["bob"])
            .matches(&ev));
    }

    #[test]
    fn test_matches_any_is_union() {
        let ev = event("id", "pk", 3, 1, vec![]);
        let filters = vec![Filter::new().kinds(vec![1]), Filter::new().kinds(vec![3])];
        assert!(Filter::matches_any(&filters, &ev));
        assert!(!Filter::matches_any(&filters[..1], &ev));
    }
}
