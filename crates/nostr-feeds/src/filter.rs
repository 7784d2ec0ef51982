//! NIP-01 subscription filters.
//!
//! A filter is a conjunction: an event matches when it satisfies every
//! constraint that is present. Value sets are ordered sets, so two filters
//! compare equal when they constrain the same values regardless of the order
//! they were built in.

use nostr_sdk::Event;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// NIP-01 Filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<BTreeSet<String>>,

    /// Authors (hex pubkeys)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<BTreeSet<String>>,

    /// Event kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<BTreeSet<u16>>,

    /// Events created at or after this timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events created at or before this timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// NIP-50 search terms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    /// Generic tag queries. Keys carry the `#` prefix (`#e`, `#t`).
    #[serde(flatten)]
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

/// Normalise a tag name to its filter key (`t` and `#t` both become `#t`).
pub fn tag_key(name: &str) -> String {
    if name.starts_with('#') {
        name.to_string()
    } else {
        format!("#{name}")
    }
}

impl Filter {
    /// Create a new empty filter (matches all events).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Add a tag query. The name may be given with or without the `#` prefix.
    pub fn tag(mut self, name: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags
            .insert(tag_key(name), values.into_iter().map(Into::into).collect());
        self
    }

    /// True when no event can match: an empty value set, or an inverted time window.
    pub fn is_unsatisfiable(&self) -> bool {
        let empty_set = self.ids.as_ref().is_some_and(BTreeSet::is_empty)
            || self.authors.as_ref().is_some_and(BTreeSet::is_empty)
            || self.kinds.as_ref().is_some_and(BTreeSet::is_empty)
            || self.tags.values().any(BTreeSet::is_empty);

        let inverted = matches!((self.since, self.until), (Some(since), Some(until)) if since > until);

        empty_set || inverted
    }

    /// True when every event matched by `other` is also matched by `self`.
    ///
    /// Structural check: `self` may only drop constraints or widen value sets.
    /// Limited filters are only covered by an identical filter.
    pub fn covers(&self, other: &Filter) -> bool {
        if self.limit.is_some() || other.limit.is_some() {
            return self == other;
        }

        fn set_covers<T: Ord>(wide: &Option<BTreeSet<T>>, narrow: &Option<BTreeSet<T>>) -> bool {
            match (wide, narrow) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(wide), Some(narrow)) => narrow.is_subset(wide),
            }
        }

        let since_ok = match (self.since, other.since) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(wide), Some(narrow)) => narrow >= wide,
        };
        let until_ok = match (self.until, other.until) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(wide), Some(narrow)) => narrow <= wide,
        };
        let search_ok = self.search.is_none() || self.search == other.search;
        let tags_ok = self.tags.iter().all(|(key, wide)| {
            other
                .tags
                .get(key)
                .is_some_and(|narrow| narrow.is_subset(wide))
        });

        set_covers(&self.ids, &other.ids)
            && set_covers(&self.authors, &other.authors)
            && set_covers(&self.kinds, &other.kinds)
            && since_ok
            && until_ok
            && search_ok
            && tags_ok
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&event.id.to_hex()) {
                return false;
            }
        }

        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey.to_hex()) {
                return false;
            }
        }

        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind.as_u16()) {
                return false;
            }
        }

        let created_at = event.created_at.as_u64();
        if self.since.is_some_and(|since| created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| created_at > until) {
            return false;
        }

        if let Some(search) = &self.search {
            let content = event.content.to_lowercase();
            if !search
                .split_whitespace()
                .all(|term| content.contains(&term.to_lowercase()))
            {
                return false;
            }
        }

        self.tags.iter().all(|(key, values)| {
            let name = key.trim_start_matches('#');
            event.tags.iter().any(|tag| {
                let s = tag.as_slice();
                s.len() >= 2 && s[0] == name && values.contains(&s[1])
            })
        })
    }
}

/// Coordinate of a replaceable event: `kind:pubkey:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: u16,
    pub pubkey: String,
    pub identifier: String,
}

impl Address {
    /// Parse `kind:pubkey:identifier`. The identifier may itself contain colons.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let kind = parts.next()?.parse().ok()?;
        let pubkey = parts.next()?;
        let identifier = parts.next()?;

        if pubkey.is_empty() {
            return None;
        }

        Some(Self {
            kind,
            pubkey: pubkey.to_string(),
            identifier: identifier.to_string(),
        })
    }

    /// Address of an event, using its `d` tag as identifier (empty when absent).
    pub fn from_event(event: &Event) -> Self {
        let identifier = event
            .tags
            .iter()
            .find_map(|tag| {
                let s = tag.as_slice();
                (s.first().map(String::as_str) == Some("d")).then(|| s.get(1).cloned())
            })
            .flatten()
            .unwrap_or_default();

        Self {
            kind: event.kind.as_u16(),
            pubkey: event.pubkey.to_hex(),
            identifier,
        }
    }

    /// Filter selecting the event(s) at this address.
    pub fn to_filter(&self) -> Filter {
        let filter = Filter::new()
            .kinds([self.kind])
            .authors([self.pubkey.clone()]);

        if self.identifier.is_empty() {
            filter
        } else {
            filter.tag("d", [self.identifier.clone()])
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}

/// Decompose a mix of event ids and addresses into filters.
///
/// Plain ids share one `{ids}` filter; each address becomes a
/// `{kinds, authors, #d}` filter, and those are unioned.
pub fn id_filters(ids_or_addresses: &[String]) -> Vec<Filter> {
    let mut ids = Vec::new();
    let mut address_filters = Vec::new();

    for value in ids_or_addresses {
        match Address::parse(value) {
            Some(address) => address_filters.push(address.to_filter()),
            None => ids.push(value.clone()),
        }
    }

    let mut filters = Vec::new();
    if !ids.is_empty() {
        filters.push(Filter::new().ids(ids));
    }
    filters.extend(crate::algebra::union_filters(&address_filters));
    filters
}
