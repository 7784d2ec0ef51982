//! Feed compiler and subscription optimizer for Nostr clients
//!
//! A [`Feed`] is a declarative tree describing which events a client wants.
//! [`FeedCompiler`] reduces it to [`RequestItem`]s, pairs of optional relay
//! and filter sets, resolving lists, data vending machines and social scopes
//! through [`FeedPorts`] along the way. [`optimize_subscriptions`] regroups
//! the resulting subscriptions into one merged subscription per relay.

pub mod algebra;
pub mod compiler;
pub mod error;
pub mod feed;
pub mod filter;
pub mod optimize;
pub mod ports;
pub mod relay;
pub mod request;
pub mod tags;
pub mod wot;

// Re-export commonly used types
pub use algebra::{intersect_filters, match_filters, union_filters};
pub use compiler::{union_items, FeedCompiler};
pub use error::{FeedError, Result};
pub use feed::{CreatedAtItem, DvmItem, Feed, ListItem, RelativeBound, Scope, WotItem};
pub use filter::{id_filters, Address, Filter};
pub use optimize::{optimize_subscriptions, unrouted, OptimizedSubscriptions};
pub use ports::{
    Clock, FeedPorts, FixedClock, Offline, ProviderRequester, Requester, ScopeResolver,
    SystemClock, TrustResolver,
};
pub use relay::RelayClient;
pub use request::{ProviderRequest, RequestItem, Subscription};
pub use tags::{default_mappings, feeds_from_tags, MappingTarget, TagFeedMapping};
pub use wot::SocialGraph;

// Re-export nostr-sdk for convenience
pub use nostr_sdk;
