//! Live ports backed by an nostr-sdk relay client.

use crate::filter::Filter;
use crate::ports::{ProviderRequester, Requester};
use crate::request::{ProviderRequest, Subscription};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use nostr_sdk::prelude::{
    Client, Event, EventBuilder, EventId, JsonUtil, Keys, Kind, Tag, TagKind, Timestamp,
};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PROVIDER_EXPIRATION: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Relay client implementing the request and provider ports.
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    keys: Keys,
    default_relays: Vec<String>,
    timeout: Duration,
    provider_expiration: Duration,
}

impl RelayClient {
    /// Create a client signing with `keys`. Subscriptions without relays go to `default_relays`.
    pub fn new(keys: Keys, default_relays: Vec<String>) -> Self {
        Self {
            client: Client::new(keys.clone()),
            keys,
            default_relays,
            timeout: DEFAULT_TIMEOUT,
            provider_expiration: DEFAULT_PROVIDER_EXPIRATION,
        }
    }

    /// How long a single fetch may take.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long a provider request stays valid and is waited for.
    pub fn with_provider_expiration(mut self, expiration: Duration) -> Self {
        self.provider_expiration = expiration;
        self
    }

    /// Get the underlying nostr-sdk Client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn default_relays(&self) -> &[String] {
        &self.default_relays
    }

    /// Relays to use for a request: the given ones, or the defaults when none are given.
    pub fn route(&self, relays: &[String]) -> Result<Vec<String>> {
        let relays = if relays.is_empty() {
            self.default_relays.clone()
        } else {
            relays.to_vec()
        };

        if relays.is_empty() {
            anyhow::bail!("No relays given and no default relays configured");
        }
        Ok(relays)
    }

    /// Add and connect any relays the pool does not know yet.
    async fn ensure_relays(&self, relays: &[String]) -> Result<()> {
        for relay_url in relays {
            let added = self
                .client
                .add_relay(relay_url.as_str())
                .await
                .with_context(|| format!("Failed to add relay: {relay_url}"))?;

            if added {
                self.client
                    .connect_relay(relay_url.as_str())
                    .await
                    .with_context(|| format!("Failed to connect relay: {relay_url}"))?;
                info!("Connected to relay {relay_url}");
            }
        }
        Ok(())
    }

    /// Sign the request event for a provider, expiring `provider_expiration` after `now`.
    pub fn build_request_event(&self, request: &ProviderRequest, now: u64) -> Result<Event> {
        let expires_at = now.saturating_add(self.provider_expiration.as_secs());

        let tags = request
            .tags
            .iter()
            .filter_map(|tag| {
                let (name, values) = tag.split_first()?;
                Some(Tag::custom(TagKind::custom(name.clone()), values.to_vec()))
            })
            .chain(std::iter::once(Tag::expiration(Timestamp::from(expires_at))));

        EventBuilder::new(Kind::from(request.kind), "")
            .tags(tags)
            .sign_with_keys(&self.keys)
            .context("Failed to sign provider request")
    }

    /// Wait for the first result to `request_id` until `expires_at`.
    async fn await_result(
        &self,
        relays: &[String],
        result_kind: Kind,
        request_id: EventId,
        expires_at: u64,
    ) -> Result<Event> {
        let filter = nostr_sdk::Filter::new().kind(result_kind).event(request_id);

        loop {
            let events = self
                .client
                .fetch_events_from(relays, filter.clone(), POLL_INTERVAL)
                .await
                .context("Failed to poll for provider result")?;

            if let Some(event) = events.into_iter().next() {
                return Ok(event);
            }

            if Timestamp::now().as_u64() >= expires_at {
                anyhow::bail!("Provider request {request_id} expired without a result");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Convert to an nostr-sdk filter through the NIP-01 JSON both sides share.
pub fn to_nostr_filter(filter: &Filter) -> Result<nostr_sdk::Filter> {
    let json = serde_json::to_string(filter).context("Failed to encode filter")?;
    nostr_sdk::Filter::from_json(&json).with_context(|| format!("Relay client rejected filter {json}"))
}

/// Kind of the result event a provider publishes for a request kind.
pub fn result_kind(request_kind: u16) -> Result<Kind> {
    request_kind
        .checked_add(1000)
        .map(Kind::from)
        .with_context(|| format!("Request kind {request_kind} has no result kind"))
}

#[async_trait]
impl Requester for RelayClient {
    async fn request(
        &self,
        subscription: Subscription,
        on_event: &mut (dyn FnMut(Event) + Send),
    ) -> Result<()> {
        let relays = self.route(&subscription.relays)?;
        self.ensure_relays(&relays).await?;

        let filters = subscription
            .filters
            .iter()
            .map(to_nostr_filter)
            .collect::<Result<Vec<_>>>()?;

        let batches = try_join_all(filters.into_iter().map(|filter| {
            let relays = &relays;
            async move {
                tokio::time::timeout(
                    self.timeout,
                    self.client.fetch_events_from(relays, filter, self.timeout),
                )
                .await
                .context("Timeout fetching events")?
                .context("Failed to fetch events")
            }
        }))
        .await?;

        let mut seen = HashSet::new();
        for event in batches.into_iter().flat_map(|events| events.into_iter()) {
            if seen.insert(event.id) {
                on_event(event);
            }
        }

        debug!(relays = relays.len(), events = seen.len(), "request finished");
        Ok(())
    }
}

#[async_trait]
impl ProviderRequester for RelayClient {
    async fn request_provider(&self, request: ProviderRequest) -> Result<Event> {
        let relays = self.route(request.relays.as_deref().unwrap_or_default())?;
        self.ensure_relays(&relays).await?;

        let result_kind = result_kind(request.kind)?;
        let now = Timestamp::now().as_u64();
        let event = self.build_request_event(&request, now)?;
        let expires_at = now.saturating_add(self.provider_expiration.as_secs());

        self.client
            .send_event_to(&relays, &event)
            .await
            .with_context(|| format!("Failed to publish provider request of kind {}", request.kind))?;
        debug!(id = %event.id, kind = request.kind, "published provider request");

        self.await_result(&relays, result_kind, event.id, expires_at).await
    }
}
