//! Collaborators the compiler calls out to.
//!
//! Networking, signing and the social graph live behind these traits. The
//! compiler never retries a port; a failing port fails the compile call.

use crate::feed::Scope;
use crate::request::{ProviderRequest, Subscription};
use anyhow::Result;
use async_trait::async_trait;
use nostr_sdk::Event;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Loads stored events.
#[async_trait]
pub trait Requester: Send + Sync {
    /// Run the subscription until exhausted, reporting every event received.
    async fn request(
        &self,
        subscription: Subscription,
        on_event: &mut (dyn FnMut(Event) + Send),
    ) -> Result<()>;
}

/// Talks to data vending machines.
#[async_trait]
pub trait ProviderRequester: Send + Sync {
    /// Publish the request and resolve with the first qualifying response.
    ///
    /// Expiration is the implementation's business; the returned future may
    /// stay pending for as long as the implementation lets it.
    async fn request_provider(&self, request: ProviderRequest) -> Result<Event>;
}

/// Resolves social scopes against the current graph snapshot.
pub trait ScopeResolver: Send + Sync {
    fn pubkeys_for_scope(&self, scope: Scope) -> BTreeSet<String>;
}

/// Resolves trust windows. `min`/`max` are fractions of the highest score.
pub trait TrustResolver: Send + Sync {
    fn pubkeys_for_trust_range(&self, min: f64, max: f64) -> BTreeSet<String>;
}

/// Source of the current unix time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0
    }
}

/// Ports for compiling without network access: requests yield nothing and
/// provider requests fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

#[async_trait]
impl Requester for Offline {
    async fn request(
        &self,
        _subscription: Subscription,
        _on_event: &mut (dyn FnMut(Event) + Send),
    ) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ProviderRequester for Offline {
    async fn request_provider(&self, request: ProviderRequest) -> Result<Event> {
        anyhow::bail!("offline: cannot reach a provider for kind {}", request.kind)
    }
}

/// Everything a [`FeedCompiler`](crate::FeedCompiler) needs from the outside world.
#[derive(Clone)]
pub struct FeedPorts {
    pub requester: Arc<dyn Requester>,
    pub provider: Arc<dyn ProviderRequester>,
    pub scopes: Arc<dyn ScopeResolver>,
    pub trust: Arc<dyn TrustResolver>,
    pub clock: Arc<dyn Clock>,
}

impl FeedPorts {
    /// Ports using one object for networking and one for the social graph.
    pub fn new<N, G>(network: Arc<N>, graph: Arc<G>) -> Self
    where
        N: Requester + ProviderRequester + 'static,
        G: ScopeResolver + TrustResolver + 'static,
    {
        Self {
            requester: network.clone(),
            provider: network,
            scopes: graph.clone(),
            trust: graph,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}
