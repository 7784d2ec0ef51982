//! Feed compiler: turns a feed tree into relay/filter request items.
//!
//! Leaves become filters or relay sets directly. `Union` and `Intersection`
//! compile their children concurrently and combine the results with the
//! filter algebra. `Dvm` and `List` nodes first fetch events through the
//! ports, map the events' tags to sub-feeds, and compile those as a union.

use crate::algebra::{intersect_filters, union_filters};
use crate::error::{FeedError, Result};
use crate::feed::{CreatedAtItem, DvmItem, Feed, ListItem, Scope, WotItem};
use crate::filter::{id_filters, Address, Filter};
use crate::ports::FeedPorts;
use crate::request::{ProviderRequest, RequestItem, Subscription};
use crate::tags::{event_tags, feeds_from_tags, provider_response_tags};
use futures_util::future::{try_join_all, BoxFuture, FutureExt};
use nostr_sdk::Event;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// State fixed for the duration of one `compile` call.
struct CompileContext {
    now: u64,
}

/// Compiles feeds against a set of ports.
#[derive(Clone)]
pub struct FeedCompiler {
    ports: FeedPorts,
}

impl FeedCompiler {
    pub fn new(ports: FeedPorts) -> Self {
        Self { ports }
    }

    /// True when every node of the tree has a known type.
    pub fn can_compile(&self, feed: &Feed) -> bool {
        match feed {
            Feed::Union(feeds) | Feed::Intersection(feeds) => {
                feeds.iter().all(|feed| self.can_compile(feed))
            }
            Feed::Unknown { .. } => false,
            Feed::Address(_)
            | Feed::Author(_)
            | Feed::CreatedAt(_)
            | Feed::Dvm(_)
            | Feed::Id(_)
            | Feed::Kind(_)
            | Feed::List(_)
            | Feed::Relay(_)
            | Feed::Scope(_)
            | Feed::Search(_)
            | Feed::Tag { .. }
            | Feed::Wot(_) => true,
        }
    }

    /// Compile a feed into request items.
    ///
    /// Relative time windows are resolved against a single "now" taken at
    /// the start of the call.
    pub async fn compile(&self, feed: &Feed) -> Result<Vec<RequestItem>> {
        let cx = CompileContext {
            now: self.ports.clock.now(),
        };

        let items = self.compile_node(feed, &cx).await?;
        debug!(feed = feed.type_name(), items = items.len(), "compiled feed");
        Ok(items)
    }

    fn compile_node<'a>(
        &'a self,
        feed: &'a Feed,
        cx: &'a CompileContext,
    ) -> BoxFuture<'a, Result<Vec<RequestItem>>> {
        async move {
            match feed {
                Feed::Id(ids) => Ok(single(Filter::new().ids(ids.iter().cloned()))),
                Feed::Kind(kinds) => Ok(single(Filter::new().kinds(kinds.iter().copied()))),
                Feed::Author(authors) => Ok(single(Filter::new().authors(authors.iter().cloned()))),
                Feed::Tag { key, values } => Ok(single(Filter::new().tag(key, values.iter().cloned()))),
                Feed::Address(addresses) => Ok(vec![RequestItem::with_filters(id_filters(addresses))]),
                Feed::Relay(relays) => Ok(vec![RequestItem::with_relays(relays.clone())]),
                Feed::CreatedAt(items) => Ok(self.compile_created_at(items, cx)),
                Feed::Scope(scopes) => Ok(self.compile_scopes(scopes)),
                Feed::Search(searches) => Ok(compile_searches(searches)),
                Feed::Wot(items) => Ok(self.compile_wot(items)),
                Feed::Union(feeds) => self.compile_union(feeds, cx).await,
                Feed::Intersection(feeds) => self.compile_intersection(feeds, cx).await,
                Feed::Dvm(items) => self.compile_dvms(items, cx).await,
                Feed::List(items) => self.compile_lists(items, cx).await,
                Feed::Unknown { tag, .. } => Err(FeedError::UnsupportedFeedType(tag.clone())),
            }
        }
        .boxed()
    }

    fn compile_created_at(&self, items: &[CreatedAtItem], cx: &CompileContext) -> Vec<RequestItem> {
        let filters = items
            .iter()
            .filter_map(|item| match item.resolve(cx.now) {
                (None, None) => {
                    debug!("dropping created_at item without bounds");
                    None
                }
                (since, until) => Some(Filter {
                    since,
                    until,
                    ..Filter::default()
                }),
            })
            .collect();

        vec![RequestItem::with_filters(filters)]
    }

    fn compile_scopes(&self, scopes: &[Scope]) -> Vec<RequestItem> {
        let authors: BTreeSet<String> = scopes
            .iter()
            .flat_map(|scope| self.ports.scopes.pubkeys_for_scope(*scope))
            .collect();

        single(Filter::new().authors(authors))
    }

    fn compile_wot(&self, items: &[WotItem]) -> Vec<RequestItem> {
        let filters = items
            .iter()
            .map(|item| Filter::new().authors(self.ports.trust.pubkeys_for_trust_range(item.min, item.max)))
            .collect();

        vec![RequestItem::with_filters(filters)]
    }

    async fn compile_all(&self, feeds: &[Feed], cx: &CompileContext) -> Result<Vec<Vec<RequestItem>>> {
        try_join_all(feeds.iter().map(|feed| self.compile_node(feed, cx))).await
    }

    async fn compile_union(&self, feeds: &[Feed], cx: &CompileContext) -> Result<Vec<RequestItem>> {
        let compiled = self.compile_all(feeds, cx).await?;
        Ok(union_items(compiled.into_iter().flatten()))
    }

    async fn compile_intersection(&self, feeds: &[Feed], cx: &CompileContext) -> Result<Vec<RequestItem>> {
        let mut compiled = self.compile_all(feeds, cx).await?.into_iter();
        let Some(head) = compiled.next() else {
            return Ok(Vec::new());
        };
        let tail: Vec<Vec<RequestItem>> = compiled.collect();

        let mut result = Vec::new();
        for candidate in &head {
            let groups: Vec<Vec<&RequestItem>> = tail
                .iter()
                .map(|items| items.iter().filter(|item| compatible(candidate, item)).collect())
                .collect();

            if groups.iter().any(Vec::is_empty) {
                continue;
            }

            for combination in cartesian_product(&groups) {
                if let Some(item) = narrow(candidate, &combination) {
                    if !result.contains(&item) {
                        result.push(item);
                    }
                }
            }
        }

        Ok(result)
    }

    async fn compile_dvms(&self, items: &[DvmItem], cx: &CompileContext) -> Result<Vec<RequestItem>> {
        let responses = try_join_all(items.iter().map(|item| async move {
            let request = ProviderRequest {
                kind: item.kind,
                tags: item.tags.clone(),
                relays: item.relays.clone(),
            };

            let event = self
                .ports
                .provider
                .request_provider(request)
                .await
                .map_err(|source| FeedError::port("provider", source))?;

            Ok::<_, FeedError>(feeds_from_response(&event, item))
        }))
        .await?;

        let feeds: Vec<Feed> = responses.into_iter().flatten().collect();
        self.compile_union(&feeds, cx).await
    }

    async fn compile_lists(&self, items: &[ListItem], cx: &CompileContext) -> Result<Vec<RequestItem>> {
        let mut addresses: Vec<String> = Vec::new();
        for address in items.iter().flat_map(|item| &item.addresses) {
            if !addresses.contains(address) {
                addresses.push(address.clone());
            }
        }

        let mut events_by_address: HashMap<String, Event> = HashMap::new();
        if !addresses.is_empty() {
            let subscription = Subscription::new(Vec::new(), id_filters(&addresses));
            self.ports
                .requester
                .request(subscription, &mut |event: Event| {
                    events_by_address.insert(Address::from_event(&event).to_string(), event);
                })
                .await
                .map_err(|source| FeedError::port("request", source))?;
        }

        debug!(
            requested = addresses.len(),
            resolved = events_by_address.len(),
            "loaded lists"
        );

        let feeds: Vec<Feed> = items
            .iter()
            .flat_map(|item| {
                item.addresses
                    .iter()
                    .filter_map(|address| events_by_address.get(address))
                    .flat_map(|event| feeds_from_tags(&event_tags(event), &item.mappings))
            })
            .collect();

        self.compile_union(&feeds, cx).await
    }
}

fn single(filter: Filter) -> Vec<RequestItem> {
    vec![RequestItem::with_filters(vec![filter])]
}

fn compile_searches(searches: &[String]) -> Vec<RequestItem> {
    let filters = searches.iter().map(|search| Filter::new().search(search.clone())).collect();
    vec![RequestItem::with_filters(filters)]
}

/// Sub-feeds of one provider response; a malformed response yields none.
fn feeds_from_response(event: &Event, item: &DvmItem) -> Vec<Feed> {
    match provider_response_tags(event) {
        Ok(tags) => feeds_from_tags(&tags, &item.mappings),
        Err(err) => {
            warn!(kind = item.kind, "ignoring provider response: {err}");
            Vec::new()
        }
    }
}

/// Merge request items without losing any (relay, filter) pair.
///
/// Items with relays and filters are bucketed per relay, filter-only items
/// share one relay-agnostic bucket, and relay-only items collapse into one
/// item listing every such relay.
pub fn union_items(items: impl IntoIterator<Item = RequestItem>) -> Vec<RequestItem> {
    let mut filters_by_relay: BTreeMap<String, Vec<Filter>> = BTreeMap::new();
    let mut filters_without_relay: Vec<Filter> = Vec::new();
    let mut relays_without_filter: Vec<String> = Vec::new();

    for item in items {
        match (item.relays, item.filters) {
            (Some(relays), Some(filters)) => {
                for relay in relays {
                    if !filters.is_empty() {
                        filters_by_relay
                            .entry(relay)
                            .or_default()
                            .extend(filters.iter().cloned());
                    }
                }
            }
            (None, Some(filters)) => filters_without_relay.extend(filters),
            (Some(relays), None) => {
                for relay in relays {
                    if !relays_without_filter.contains(&relay) {
                        relays_without_filter.push(relay);
                    }
                }
            }
            (None, None) => {}
        }
    }

    let mut result: Vec<RequestItem> = filters_by_relay
        .into_iter()
        .map(|(relay, filters)| RequestItem {
            filters: Some(union_filters(&filters)),
            relays: Some(vec![relay]),
        })
        .collect();

    if !filters_without_relay.is_empty() {
        result.push(RequestItem::with_filters(union_filters(&filters_without_relay)));
    }

    if !relays_without_filter.is_empty() {
        result.push(RequestItem::with_relays(relays_without_filter));
    }

    result
}

/// Items can meet when their relay sets overlap and their filters can match a common event.
/// A missing constraint on either side is compatible with anything.
fn compatible(a: &RequestItem, b: &RequestItem) -> bool {
    let relays_ok = match (&a.relays, &b.relays) {
        (Some(a), Some(b)) => a.iter().any(|relay| b.contains(relay)),
        _ => true,
    };

    let filters_ok = match (&a.filters, &b.filters) {
        (Some(a), Some(b)) => !intersect_filters(&[a.clone(), b.clone()]).is_empty(),
        _ => true,
    };

    relays_ok && filters_ok
}

/// Every way to pick one item from each group.
fn cartesian_product<'a>(groups: &[Vec<&'a RequestItem>]) -> Vec<Vec<&'a RequestItem>> {
    groups.iter().fold(vec![Vec::new()], |combinations, group| {
        combinations
            .iter()
            .flat_map(|prefix| {
                group.iter().map(move |item| {
                    let mut combination = prefix.clone();
                    combination.push(*item);
                    combination
                })
            })
            .collect()
    })
}

/// Narrow `candidate` by each item of one combination.
///
/// Relays intersect; when a later item shares no relay with the working set,
/// the later item's relays win. Filters intersect through the filter algebra,
/// and a combination whose filters become disjoint yields nothing.
fn narrow(candidate: &RequestItem, combination: &[&RequestItem]) -> Option<RequestItem> {
    let mut relays = candidate.relays.clone();
    let mut filters = candidate.filters.clone();

    for item in combination {
        if let Some(other) = &item.relays {
            relays = Some(match relays {
                Some(current) => {
                    let shared: Vec<String> = current.into_iter().filter(|relay| other.contains(relay)).collect();
                    if shared.is_empty() {
                        other.clone()
                    } else {
                        shared
                    }
                }
                None => other.clone(),
            });
        }

        if let Some(other) = &item.filters {
            filters = Some(match filters {
                Some(current) => {
                    let narrowed = intersect_filters(&[current, other.clone()]);
                    if narrowed.is_empty() {
                        return None;
                    }
                    narrowed
                }
                None => other.clone(),
            });
        }
    }

    let item = RequestItem { filters, relays };
    (!item.is_noop()).then_some(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RelativeBound;
    use crate::ports::{
        Clock, FixedClock, ProviderRequester, Requester, ScopeResolver, TrustResolver,
    };
    use crate::tags::{MappingTarget, TagFeedMapping};
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use nostr_sdk::{EventBuilder, JsonUtil, Keys, Kind, Tag, TagKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted ports for compiler tests.
    #[derive(Default)]
    struct Mock {
        events: Vec<Event>,
        responses: Vec<Event>,
        requests: Mutex<Vec<Subscription>>,
        provider_calls: AtomicUsize,
        scopes: BTreeMap<Scope, Vec<String>>,
        trusted: Vec<String>,
        fail_requests: bool,
    }

    #[async_trait]
    impl Requester for Mock {
        async fn request(
            &self,
            subscription: Subscription,
            on_event: &mut (dyn FnMut(Event) + Send),
        ) -> AnyResult<()> {
            if self.fail_requests {
                anyhow::bail!("relay unreachable");
            }
            for event in &self.events {
                if crate::algebra::match_filters(&subscription.filters, event) {
                    on_event(event.clone());
                }
            }
            self.requests.lock().unwrap().push(subscription);
            Ok(())
        }
    }

    #[async_trait]
    impl ProviderRequester for Mock {
        async fn request_provider(&self, request: ProviderRequest) -> AnyResult<Event> {
            let n = self.provider_calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(n)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no response scripted for kind {}", request.kind))
        }
    }

    impl ScopeResolver for Mock {
        fn pubkeys_for_scope(&self, scope: Scope) -> BTreeSet<String> {
            self.scopes.get(&scope).cloned().unwrap_or_default().into_iter().collect()
        }
    }

    impl TrustResolver for Mock {
        fn pubkeys_for_trust_range(&self, min: f64, max: f64) -> BTreeSet<String> {
            if min <= 0.5 && max >= 0.5 {
                self.trusted.iter().cloned().collect()
            } else {
                BTreeSet::new()
            }
        }
    }

    fn compiler_with(mock: Mock, now: u64) -> (FeedCompiler, Arc<Mock>) {
        let mock = Arc::new(mock);
        let ports = FeedPorts::new(mock.clone(), mock.clone()).with_clock(FixedClock(now));
        (FeedCompiler::new(ports), mock)
    }

    fn compiler() -> FeedCompiler {
        compiler_with(Mock::default(), 1_000).0
    }

    /// Request items as a set of (relays, filters) sets, ignoring order.
    fn as_set(items: &[RequestItem]) -> BTreeSet<(Option<BTreeSet<String>>, Option<BTreeSet<Filter>>)> {
        items
            .iter()
            .map(|item| {
                (
                    item.relays.as_ref().map(|r| r.iter().cloned().collect()),
                    item.filters.as_ref().map(|f| f.iter().cloned().collect()),
                )
            })
            .collect()
    }

    fn relays(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    fn on_relay(url: &str, feed: Feed) -> Feed {
        Feed::Intersection(vec![Feed::Relay(relays(&[url])), feed])
    }

    fn signed(keys: &Keys, kind: u16, tags: Vec<Vec<&str>>) -> Event {
        let tags = tags.into_iter().map(|parts| {
            Tag::custom(
                TagKind::custom(parts[0].to_string()),
                parts[1..].iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )
        });
        EventBuilder::new(Kind::from(kind), "")
            .tags(tags)
            .sign_with_keys(keys)
            .unwrap()
    }

    #[tokio::test]
    async fn leaf_feeds_compile_to_single_filters() {
        let compiler = compiler();

        assert_eq!(
            compiler.compile(&Feed::Kind(vec![1, 7])).await.unwrap(),
            single(Filter::new().kinds([1, 7]))
        );
        assert_eq!(
            compiler.compile(&Feed::tag("t", ["rust"])).await.unwrap(),
            single(Filter::new().tag("#t", ["rust"]))
        );
        assert_eq!(
            compiler.compile(&Feed::Relay(relays(&["wss://r"]))).await.unwrap(),
            vec![RequestItem::with_relays(relays(&["wss://r"]))]
        );
    }

    #[tokio::test]
    async fn address_feed_uses_id_decomposition() {
        let items = compiler()
            .compile(&Feed::Address(vec!["30023:pk:post".into(), "e1".into()]))
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        let filters: BTreeSet<Filter> = items[0].filters.clone().unwrap().into_iter().collect();
        assert_eq!(
            filters,
            BTreeSet::from([
                Filter::new().ids(["e1"]),
                Filter::new().kinds([30023]).authors(["pk"]).tag("d", ["post"]),
            ])
        );
    }

    #[tokio::test]
    async fn relative_created_at_uses_now() {
        let (compiler, _) = compiler_with(Mock::default(), 5_000);
        let feed = Feed::CreatedAt(vec![CreatedAtItem {
            since: Some(10),
            until: None,
            relative: vec![RelativeBound::Since],
        }]);

        assert_eq!(compiler.compile(&feed).await.unwrap(), single(Filter::new().since(4_990)));
    }

    #[tokio::test]
    async fn relative_until_uses_now() {
        let (compiler, _) = compiler_with(Mock::default(), 5_000);
        let feed = Feed::CreatedAt(vec![CreatedAtItem {
            since: None,
            until: Some(10),
            relative: vec![RelativeBound::Until],
        }]);
        assert_eq!(compiler.compile(&feed).await.unwrap(), single(Filter::new().until(4_990)));

        let mixed = Feed::CreatedAt(vec![CreatedAtItem {
            since: Some(60),
            until: Some(4_000),
            relative: vec![RelativeBound::Since],
        }]);
        assert_eq!(
            compiler.compile(&mixed).await.unwrap(),
            single(Filter::new().since(4_940).until(4_000))
        );
    }

    #[tokio::test]
    async fn created_at_items_are_alternatives() {
        let feed = Feed::CreatedAt(vec![
            CreatedAtItem { since: Some(100), until: Some(200), relative: vec![] },
            CreatedAtItem::default(),
            CreatedAtItem { since: None, until: Some(50), relative: vec![] },
        ]);

        let items = compiler().compile(&feed).await.unwrap();
        assert_eq!(
            items,
            vec![RequestItem::with_filters(vec![
                Filter::new().since(100).until(200),
                Filter::new().until(50),
            ])]
        );
    }

    #[tokio::test]
    async fn one_now_per_compile_call() {
        struct Ticking(AtomicUsize);
        impl Clock for Ticking {
            fn now(&self) -> u64 {
                1_000 + self.0.fetch_add(100, Ordering::SeqCst) as u64
            }
        }

        let mock = Arc::new(Mock::default());
        let mut ports = FeedPorts::new(mock.clone(), mock);
        ports.clock = Arc::new(Ticking(AtomicUsize::new(0)));
        let compiler = FeedCompiler::new(ports);

        let window = || {
            Feed::CreatedAt(vec![CreatedAtItem {
                since: Some(10),
                until: None,
                relative: vec![RelativeBound::Since],
            }])
        };
        let feed = Feed::Union(vec![window(), Feed::Intersection(vec![window(), window()])]);

        let items = compiler.compile(&feed).await.unwrap();
        assert_eq!(items, single(Filter::new().since(990)));
    }

    #[tokio::test]
    async fn scope_feed_dedupes_pubkeys() {
        let mock = Mock {
            scopes: BTreeMap::from([
                (Scope::Follows, vec!["a".to_string(), "b".to_string()]),
                (Scope::Network, vec!["b".to_string(), "c".to_string()]),
            ]),
            ..Default::default()
        };
        let (compiler, _) = compiler_with(mock, 0);

        let items = compiler
            .compile(&Feed::Scope(vec![Scope::Follows, Scope::Network, Scope::Followers]))
            .await
            .unwrap();
        assert_eq!(items, single(Filter::new().authors(["a", "b", "c"])));
    }

    #[tokio::test]
    async fn wot_and_search_items_are_alternatives() {
        let mock = Mock {
            trusted: vec!["t1".to_string()],
            ..Default::default()
        };
        let (compiler, _) = compiler_with(mock, 0);

        let items = compiler
            .compile(&Feed::Wot(vec![WotItem::default(), WotItem { min: 0.9, max: 1.0 }]))
            .await
            .unwrap();
        assert_eq!(
            items,
            vec![RequestItem::with_filters(vec![
                Filter::new().authors(["t1"]),
                Filter::new().authors(Vec::<String>::new()),
            ])]
        );

        let items = compiler
            .compile(&Feed::Search(vec!["rust".into(), "nostr".into()]))
            .await
            .unwrap();
        assert_eq!(
            items,
            vec![RequestItem::with_filters(vec![
                Filter::new().search("rust"),
                Filter::new().search("nostr"),
            ])]
        );
    }

    #[tokio::test]
    async fn union_of_one_is_identity() {
        let compiler = compiler();
        let feeds = [
            Feed::Kind(vec![1, 6]),
            Feed::Relay(relays(&["wss://a", "wss://b"])),
            on_relay("wss://a", Feed::Author(vec!["x".into()])),
            Feed::Search(vec!["rust".into(), "nostr".into()]),
            Feed::Address(vec!["30023:pk:post".into(), "e1".into()]),
        ];

        for feed in feeds {
            let direct = compiler.compile(&feed).await.unwrap();
            let wrapped = compiler.compile(&Feed::Union(vec![feed.clone()])).await.unwrap();
            assert_eq!(as_set(&direct), as_set(&wrapped), "feed {feed:?}");
        }
    }

    #[tokio::test]
    async fn union_keeps_relays_apart() {
        let feed = Feed::Union(vec![
            on_relay("r1", Feed::Kind(vec![1])),
            on_relay("r2", Feed::Kind(vec![2])),
        ]);

        let items = compiler().compile(&feed).await.unwrap();
        assert_eq!(
            as_set(&items),
            as_set(&[
                RequestItem {
                    filters: Some(vec![Filter::new().kinds([1])]),
                    relays: Some(relays(&["r1"])),
                },
                RequestItem {
                    filters: Some(vec![Filter::new().kinds([2])]),
                    relays: Some(relays(&["r2"])),
                },
            ])
        );
    }

    #[tokio::test]
    async fn union_buckets_filters_relays_and_wildcards() {
        let feed = Feed::Union(vec![
            Feed::Kind(vec![1]),
            Feed::Kind(vec![7]),
            Feed::Relay(relays(&["wss://a"])),
            Feed::Relay(relays(&["wss://a", "wss://b"])),
            on_relay("wss://c", Feed::Author(vec!["x".into()])),
            on_relay("wss://c", Feed::Author(vec!["y".into()])),
        ]);

        let items = compiler().compile(&feed).await.unwrap();
        assert_eq!(
            as_set(&items),
            as_set(&[
                RequestItem::with_filters(vec![Filter::new().kinds([1, 7])]),
                RequestItem::with_relays(relays(&["wss://a", "wss://b"])),
                RequestItem {
                    filters: Some(vec![Filter::new().authors(["x", "y"])]),
                    relays: Some(relays(&["wss://c"])),
                },
            ])
        );
    }

    #[tokio::test]
    async fn intersection_of_filter_and_relay() {
        let feed = Feed::Intersection(vec![
            Feed::Author(vec!["A".into()]),
            Feed::Relay(relays(&["wss://r"])),
        ]);

        let items = compiler().compile(&feed).await.unwrap();
        assert_eq!(
            items,
            vec![RequestItem {
                filters: Some(vec![Filter::new().authors(["A"])]),
                relays: Some(relays(&["wss://r"])),
            }]
        );
    }

    #[tokio::test]
    async fn intersection_narrows_filters() {
        let feed = Feed::Intersection(vec![Feed::Kind(vec![1, 2]), Feed::Kind(vec![2, 3])]);
        assert_eq!(compiler().compile(&feed).await.unwrap(), single(Filter::new().kinds([2])));

        let disjoint = Feed::Intersection(vec![Feed::Kind(vec![1]), Feed::Kind(vec![2])]);
        assert!(compiler().compile(&disjoint).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn intersection_matches_exactly_the_shared_events() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let events = vec![
            signed(&alice, 1, vec![vec!["t", "rust"]]),
            signed(&alice, 7, vec![]),
            signed(&bob, 1, vec![vec!["t", "rust"]]),
            signed(&bob, 1, vec![]),
        ];

        // (alice ∨ #rust) ∧ kind 1
        let a = Feed::Union(vec![
            Feed::Author(vec![alice.public_key().to_hex()]),
            Feed::tag("t", ["rust"]),
        ]);
        let b = Feed::Kind(vec![1]);

        let compiler = compiler();
        let matched = |items: &[RequestItem]| -> BTreeSet<String> {
            let filters: Vec<Filter> = items.iter().flat_map(|i| i.filters.clone().unwrap_or_default()).collect();
            events
                .iter()
                .filter(|e| crate::algebra::match_filters(&filters, e))
                .map(|e| e.id.to_hex())
                .collect()
        };

        let in_a = matched(&compiler.compile(&a).await.unwrap());
        let in_b = matched(&compiler.compile(&b).await.unwrap());
        let both = matched(&compiler.compile(&Feed::Intersection(vec![a, b])).await.unwrap());

        assert_eq!(both, in_a.intersection(&in_b).cloned().collect());
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn intersection_emits_every_compatible_combination() {
        let feed = Feed::Intersection(vec![
            Feed::Kind(vec![1]),
            Feed::Union(vec![
                on_relay("r1", Feed::Kind(vec![1])),
                on_relay("r2", Feed::Kind(vec![1])),
            ]),
        ]);

        let items = compiler().compile(&feed).await.unwrap();
        assert_eq!(
            as_set(&items),
            as_set(&[
                RequestItem {
                    filters: Some(vec![Filter::new().kinds([1])]),
                    relays: Some(relays(&["r1"])),
                },
                RequestItem {
                    filters: Some(vec![Filter::new().kinds([1])]),
                    relays: Some(relays(&["r2"])),
                },
            ])
        );
    }

    #[tokio::test]
    async fn intersection_crosses_all_remaining_children() {
        let feed = Feed::Intersection(vec![
            Feed::Kind(vec![1]),
            Feed::Union(vec![
                on_relay("r1", Feed::Kind(vec![1])),
                on_relay("r2", Feed::Kind(vec![1])),
            ]),
            Feed::Union(vec![
                Feed::Author(vec!["a".into()]),
                on_relay("r2", Feed::Author(vec!["b".into()])),
            ]),
        ]);

        let items = compiler().compile(&feed).await.unwrap();
        // r1 then r2 share nothing, so the later r2 wins.
        assert_eq!(
            as_set(&items),
            as_set(&[
                RequestItem {
                    filters: Some(vec![Filter::new().kinds([1]).authors(["a"])]),
                    relays: Some(relays(&["r1"])),
                },
                RequestItem {
                    filters: Some(vec![Filter::new().kinds([1]).authors(["a"])]),
                    relays: Some(relays(&["r2"])),
                },
                RequestItem {
                    filters: Some(vec![Filter::new().kinds([1]).authors(["b"])]),
                    relays: Some(relays(&["r2"])),
                },
            ])
        );
    }

    #[tokio::test]
    async fn intersection_drops_candidates_without_partners() {
        let feed = Feed::Intersection(vec![
            Feed::Union(vec![
                on_relay("r1", Feed::Kind(vec![1])),
                on_relay("r2", Feed::Kind(vec![1])),
            ]),
            Feed::Relay(relays(&["r2"])),
        ]);

        let items = compiler().compile(&feed).await.unwrap();
        assert_eq!(
            items,
            vec![RequestItem {
                filters: Some(vec![Filter::new().kinds([1])]),
                relays: Some(relays(&["r2"])),
            }]
        );
    }

    #[test]
    fn conflicting_relays_last_match_wins() {
        let a = RequestItem::with_filters(vec![Filter::new().kinds([1])]);
        let r1 = RequestItem::with_relays(relays(&["r1"]));
        let r2 = RequestItem::with_relays(relays(&["r2"]));

        let item = narrow(&a, &[&r1, &r2]).unwrap();
        assert_eq!(item.relays, Some(relays(&["r2"])));
    }

    #[tokio::test]
    async fn disjunctive_items_are_not_conjunctions() {
        // One item with two filters is an OR; intersecting narrows with AND.
        let or_feed = Feed::Search(vec!["rust".into(), "nostr".into()]);
        let items = compiler().compile(&or_feed).await.unwrap();
        assert_eq!(items[0].filters.as_ref().map(Vec::len), Some(2));

        let and_feed = Feed::Intersection(vec![
            Feed::Search(vec!["rust".into()]),
            Feed::Search(vec!["nostr".into()]),
        ]);
        let items = compiler().compile(&and_feed).await.unwrap();
        assert_eq!(items, single(Filter::new().search("rust nostr")));
    }

    #[tokio::test]
    async fn unknown_feed_fails_the_whole_compile() {
        let unknown = Feed::Unknown {
            tag: "label".into(),
            args: vec![],
        };
        let feed = Feed::Union(vec![
            Feed::Kind(vec![1]),
            Feed::Intersection(vec![Feed::Union(vec![unknown]), Feed::Kind(vec![2])]),
        ]);

        let compiler = compiler();
        assert!(!compiler.can_compile(&feed));
        assert!(matches!(
            compiler.compile(&feed).await,
            Err(FeedError::UnsupportedFeedType(tag)) if tag == "label"
        ));
        assert!(compiler.can_compile(&Feed::Union(vec![Feed::Kind(vec![1]), Feed::Dvm(vec![])])));
    }

    #[tokio::test]
    async fn dvm_response_skips_echoed_tags() {
        let requester = Keys::generate();
        let request = signed(&requester, 5300, vec![]);
        let carol = Keys::generate().public_key().to_hex();
        let request_id = request.id.to_hex();
        let request_pubkey = request.pubkey.to_hex();

        let response = signed(
            &Keys::generate(),
            6300,
            vec![
                vec!["request", &request.as_json()],
                vec!["p", &request_pubkey],
                vec!["p", &carol],
                vec!["e", &request_id],
                vec!["t", "rust"],
            ],
        );

        let (compiler, mock) = compiler_with(
            Mock {
                responses: vec![response],
                ..Default::default()
            },
            0,
        );

        let feed = Feed::Dvm(vec![DvmItem {
            kind: 5300,
            tags: vec![],
            relays: None,
            mappings: vec![
                TagFeedMapping::new("p", MappingTarget::Author),
                TagFeedMapping::new("e", MappingTarget::Id),
                TagFeedMapping::new("t", MappingTarget::Tag("#t".into())),
            ],
        }]);

        let items = compiler.compile(&feed).await.unwrap();
        assert_eq!(mock.provider_calls.load(Ordering::SeqCst), 1);
        assert_eq!(items.len(), 1);
        let filters: BTreeSet<Filter> = items[0].filters.clone().unwrap().into_iter().collect();
        assert_eq!(
            filters,
            BTreeSet::from([Filter::new().authors([carol]), Filter::new().tag("t", ["rust"])])
        );
    }

    #[tokio::test]
    async fn malformed_dvm_response_contributes_nothing() {
        let bad = signed(&Keys::generate(), 6300, vec![vec!["request", "{oops"], vec!["p", "x"]]);
        let good = signed(&Keys::generate(), 6300, vec![vec!["p", "y"]]);

        let (compiler, _) = compiler_with(
            Mock {
                responses: vec![bad, good],
                ..Default::default()
            },
            0,
        );

        let item = |kind| DvmItem {
            kind,
            tags: vec![],
            relays: None,
            mappings: vec![TagFeedMapping::new("p", MappingTarget::Author)],
        };

        // Items are requested concurrently, so either response may land on either item.
        let items = compiler.compile(&Feed::Dvm(vec![item(5300), item(5301)])).await.unwrap();
        assert_eq!(items, single(Filter::new().authors(["y"])));
    }

    #[tokio::test]
    async fn provider_failure_fails_compile() {
        let feed = Feed::Union(vec![
            Feed::Kind(vec![1]),
            Feed::Dvm(vec![DvmItem {
                kind: 5300,
                tags: vec![],
                relays: None,
                mappings: vec![],
            }]),
        ]);

        assert!(matches!(
            compiler().compile(&feed).await,
            Err(FeedError::PortFailure { port: "provider", .. })
        ));
    }

    #[tokio::test]
    async fn list_feed_maps_resolved_lists() {
        let owner = Keys::generate();
        let address = format!("30000:{}:friends", owner.public_key().to_hex());
        let list = signed(
            &owner,
            30000,
            vec![vec!["d", "friends"], vec!["p", "alice"], vec!["p", "bob"], vec!["t", "rust"]],
        );

        let (compiler, mock) = compiler_with(
            Mock {
                events: vec![list],
                ..Default::default()
            },
            0,
        );

        let feed = Feed::List(vec![
            ListItem {
                addresses: vec![address.clone()],
                mappings: vec![TagFeedMapping::new("p", MappingTarget::Author)],
            },
            ListItem {
                addresses: vec![address.clone(), "30000:missing:x".into()],
                mappings: vec![TagFeedMapping::new("t", MappingTarget::Tag("#t".into()))],
            },
        ]);

        let items = compiler.compile(&feed).await.unwrap();
        let filters: BTreeSet<Filter> = items[0].filters.clone().unwrap().into_iter().collect();
        assert_eq!(
            filters,
            BTreeSet::from([Filter::new().authors(["alice", "bob"]), Filter::new().tag("t", ["rust"])])
        );

        // One request for all addresses.
        let requests = mock.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].filters.len(), 2);
    }

    #[tokio::test]
    async fn list_keeps_last_received_event_per_address() {
        let owner = Keys::generate();
        let address = format!("30000:{}:friends", owner.public_key().to_hex());
        let older = signed(&owner, 30000, vec![vec!["d", "friends"], vec!["p", "old"]]);
        let newer = signed(&owner, 30000, vec![vec!["d", "friends"], vec!["p", "new"]]);

        let (compiler, _) = compiler_with(
            Mock {
                events: vec![older, newer],
                ..Default::default()
            },
            0,
        );

        let feed = Feed::List(vec![ListItem {
            addresses: vec![address],
            mappings: vec![TagFeedMapping::new("p", MappingTarget::Author)],
        }]);

        let items = compiler.compile(&feed).await.unwrap();
        assert_eq!(items, single(Filter::new().authors(["new"])));
    }

    #[tokio::test]
    async fn request_failure_fails_compile() {
        let (compiler, _) = compiler_with(
            Mock {
                fail_requests: true,
                ..Default::default()
            },
            0,
        );

        let feed = Feed::List(vec![ListItem {
            addresses: vec!["30000:pk:x".into()],
            mappings: vec![],
        }]);

        assert!(matches!(
            compiler.compile(&feed).await,
            Err(FeedError::PortFailure { port: "request", .. })
        ));
    }
}
