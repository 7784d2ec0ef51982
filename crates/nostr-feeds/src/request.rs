//! Compiled request units and the subscriptions they become.

use crate::filter::Filter;
use serde::{Deserialize, Serialize};

/// A compiled unit of demand.
///
/// Absent `filters` means "anything on these relays"; absent `relays` means
/// "wherever the router sends it". Multiple filters are alternatives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relays: Option<Vec<String>>,
}

impl RequestItem {
    pub fn with_filters(filters: Vec<Filter>) -> Self {
        Self {
            filters: Some(filters),
            relays: None,
        }
    }

    pub fn with_relays(relays: Vec<String>) -> Self {
        Self {
            filters: None,
            relays: Some(relays),
        }
    }

    /// An item constraining nothing must be ignored by consumers.
    pub fn is_noop(&self) -> bool {
        self.filters.is_none() && self.relays.is_none()
    }

    /// Turn the item into a subscription, routing relay-less items to `fallback_relays`.
    ///
    /// Returns `None` for no-op items and when no relay is available.
    pub fn into_subscription(self, fallback_relays: &[String]) -> Option<Subscription> {
        if self.is_noop() {
            return None;
        }

        let relays = match self.relays {
            Some(relays) if !relays.is_empty() => relays,
            _ => fallback_relays.to_vec(),
        };

        if relays.is_empty() {
            return None;
        }

        Some(Subscription {
            relays,
            filters: self.filters.unwrap_or_else(|| vec![Filter::new()]),
        })
    }
}

/// Filters to run against a set of relays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub relays: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl Subscription {
    pub fn new(relays: Vec<String>, filters: Vec<Filter>) -> Self {
        Self { relays, filters }
    }
}

/// A request to a data vending machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relays: Option<Vec<String>>,
}
