//! Subscription optimization: one merged subscription per relay.

use crate::algebra::union_filters;
use crate::filter::Filter;
use crate::request::Subscription;

/// Lazily yields, per distinct relay in first-appearance order, a
/// subscription to that relay alone whose filters are the union of every
/// input filter sent to it.
///
/// The iterator borrows its input and is `Clone`, so the result can be
/// walked again from the start.
#[derive(Debug, Clone)]
pub struct OptimizedSubscriptions<'a> {
    subscriptions: &'a [Subscription],
    relays: Vec<&'a str>,
    next: usize,
}

impl<'a> Iterator for OptimizedSubscriptions<'a> {
    type Item = Subscription;

    fn next(&mut self) -> Option<Self::Item> {
        let relay = *self.relays.get(self.next)?;
        self.next += 1;

        let filters: Vec<Filter> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.relays.iter().any(|r| r == relay))
            .flat_map(|sub| sub.filters.iter().cloned())
            .collect();

        Some(Subscription::new(vec![relay.to_string()], union_filters(&filters)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.relays.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for OptimizedSubscriptions<'_> {}

/// Regroup subscriptions by relay.
///
/// Relays are compared as exact strings. Subscriptions without relays
/// contribute nothing; see [`unrouted`] to find them.
pub fn optimize_subscriptions(subscriptions: &[Subscription]) -> OptimizedSubscriptions<'_> {
    let mut relays: Vec<&str> = Vec::new();
    for relay in subscriptions.iter().flat_map(|sub| &sub.relays) {
        if !relays.contains(&relay.as_str()) {
            relays.push(relay);
        }
    }

    OptimizedSubscriptions {
        subscriptions,
        relays,
        next: 0,
    }
}

/// Subscriptions that name no relay and so cannot be optimized.
pub fn unrouted(subscriptions: &[Subscription]) -> impl Iterator<Item = &Subscription> {
    subscriptions.iter().filter(|sub| sub.relays.is_empty())
}
