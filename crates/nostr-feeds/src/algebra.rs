//! Set algebra over filter lists.
//!
//! A list of filters is a disjunction, a single filter is a conjunction.
//! `union_filters` shrinks a list without changing what it matches;
//! `intersect_filters` narrows lists against each other.

use crate::filter::Filter;
use nostr_sdk::Event;
use std::collections::BTreeSet;

/// Smallest filter list matching exactly the union of the inputs.
///
/// Duplicates are dropped, filters that differ in a single value set are
/// merged into one, and filters covered by another filter are removed.
pub fn union_filters(filters: &[Filter]) -> Vec<Filter> {
    let mut result: Vec<Filter> = Vec::with_capacity(filters.len());
    for filter in filters {
        if !result.contains(filter) {
            result.push(filter.clone());
        }
    }

    while let Some((i, j, merged)) = find_mergeable(&result) {
        result[i] = merged;
        result.remove(j);
    }

    let kept: Vec<bool> = result
        .iter()
        .enumerate()
        .map(|(i, filter)| {
            !result
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other.covers(filter) && (j < i || !filter.covers(other)))
        })
        .collect();

    result
        .into_iter()
        .zip(kept)
        .filter_map(|(filter, keep)| keep.then_some(filter))
        .collect()
}

fn find_mergeable(filters: &[Filter]) -> Option<(usize, usize, Filter)> {
    for i in 0..filters.len() {
        for j in (i + 1)..filters.len() {
            if let Some(merged) = merge_pair(&filters[i], &filters[j]) {
                return Some((i, j, merged));
            }
        }
    }
    None
}

/// Merge two filters into one when that is exact: same shape and scalars,
/// and at most one value set differs.
fn merge_pair(a: &Filter, b: &Filter) -> Option<Filter> {
    if a.limit.is_some() || b.limit.is_some() {
        return (a == b).then(|| a.clone());
    }

    if a.since != b.since || a.until != b.until || a.search != b.search {
        return None;
    }

    if !a.tags.keys().eq(b.tags.keys()) {
        return None;
    }

    let mut differing = set_difference_count(&a.ids, &b.ids)?
        + set_difference_count(&a.authors, &b.authors)?
        + set_difference_count(&a.kinds, &b.kinds)?;
    differing += a
        .tags
        .iter()
        .filter(|(key, values)| b.tags.get(*key) != Some(*values))
        .count();

    if differing > 1 {
        return None;
    }

    let mut merged = a.clone();
    merged.ids = union_sets(&a.ids, &b.ids);
    merged.authors = union_sets(&a.authors, &b.authors);
    merged.kinds = union_sets(&a.kinds, &b.kinds);
    for (key, values) in merged.tags.iter_mut() {
        if let Some(other) = b.tags.get(key) {
            values.extend(other.iter().cloned());
        }
    }

    Some(merged)
}

/// `None` when presence differs, otherwise 1 if the sets differ.
fn set_difference_count<T: Ord>(a: &Option<BTreeSet<T>>, b: &Option<BTreeSet<T>>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(usize::from(a != b)),
        (None, None) => Some(0),
        _ => None,
    }
}

fn union_sets<T: Ord + Clone>(a: &Option<BTreeSet<T>>, b: &Option<BTreeSet<T>>) -> Option<BTreeSet<T>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(b).cloned().collect()),
        (Some(s), None) | (None, Some(s)) => Some(s.clone()),
        (None, None) => None,
    }
}

/// Outer `None` when both sides constrain and share nothing.
fn intersect_sets<T: Ord + Clone>(
    a: &Option<BTreeSet<T>>,
    b: &Option<BTreeSet<T>>,
) -> Option<Option<BTreeSet<T>>> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let shared: BTreeSet<T> = a.intersection(b).cloned().collect();
            (!shared.is_empty()).then_some(Some(shared))
        }
        (Some(s), None) | (None, Some(s)) => Some(Some(s.clone())),
        (None, None) => Some(None),
    }
}

impl Filter {
    /// Conjunction of two filters, `None` when provably disjoint.
    pub fn intersect(&self, other: &Filter) -> Option<Filter> {
        let mut tags = self.tags.clone();
        for (key, values) in &other.tags {
            let narrowed = intersect_sets(&tags.get(key).cloned(), &Some(values.clone()))??;
            tags.insert(key.clone(), narrowed);
        }

        let filter = Filter {
            ids: intersect_sets(&self.ids, &other.ids)?,
            authors: intersect_sets(&self.authors, &other.authors)?,
            kinds: intersect_sets(&self.kinds, &other.kinds)?,
            since: self.since.max(other.since),
            until: match (self.until, other.until) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            limit: match (self.limit, other.limit) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            search: match (&self.search, &other.search) {
                (Some(a), Some(b)) if a != b => Some(format!("{a} {b}")),
                (a, b) => a.clone().or_else(|| b.clone()),
            },
            tags,
        };

        (!filter.is_unsatisfiable()).then_some(filter)
    }
}

/// Filters matching the events matched by every group. Empty when the
/// groups are provably disjoint, or when there are no groups.
pub fn intersect_filters(groups: &[Vec<Filter>]) -> Vec<Filter> {
    let Some((first, rest)) = groups.split_first() else {
        return Vec::new();
    };

    let mut result = first.clone();
    for group in rest {
        result = result
            .iter()
            .flat_map(|a| group.iter().filter_map(move |b| a.intersect(b)))
            .collect();

        if result.is_empty() {
            break;
        }
    }

    union_filters(&result)
}

/// True when any filter matches the event.
pub fn match_filters(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|filter| filter.matches(event))
}
