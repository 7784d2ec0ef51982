//! In-memory social graph backing the scope and trust-range ports.
//!
//! Built from follow lists (kind 3) and mute lists (kind 10000). Only the
//! newest list per author is kept.

use crate::feed::Scope;
use crate::filter::Filter;
use crate::ports::{Requester, ScopeResolver, TrustResolver};
use crate::request::Subscription;
use anyhow::{Context, Result};
use nostr_sdk::{Event, Kind};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const FOLLOW_LIST: u16 = 3;
const MUTE_LIST: u16 = 10000;

/// A list of pubkeys and the time it was published.
#[derive(Debug, Clone, Default)]
struct PubkeyList {
    created_at: u64,
    pubkeys: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SocialGraph {
    user: Option<String>,
    follows: HashMap<String, PubkeyList>,
    mutes: HashMap<String, PubkeyList>,
    scores: HashMap<String, i64>,
    max_score: i64,
}

impl SocialGraph {
    /// An empty graph. Scopes resolve relative to `user`.
    pub fn new(user: Option<String>) -> Self {
        Self {
            user,
            ..Self::default()
        }
    }

    /// Fetch the user's own lists, the follow and mute lists of everyone they
    /// follow, and the follow lists that name the user.
    pub async fn load(requester: &dyn Requester, user: &str) -> Result<Self> {
        let mut graph = Self::new(Some(user.to_string()));

        let mut events = Vec::new();
        let own = Filter::new().kinds([FOLLOW_LIST, MUTE_LIST]).authors([user]);
        requester
            .request(Subscription::new(Vec::new(), vec![own]), &mut |event: Event| events.push(event))
            .await
            .with_context(|| format!("Failed to load follow list for {user}"))?;
        graph.ingest_all(&events);

        let follows = graph.follows(user);
        if !follows.is_empty() {
            let mut events = Vec::new();
            let lists = Filter::new().kinds([FOLLOW_LIST, MUTE_LIST]).authors(follows.iter().cloned());
            requester
                .request(Subscription::new(Vec::new(), vec![lists]), &mut |event: Event| events.push(event))
                .await
                .context("Failed to load follow lists of follows")?;
            graph.ingest_all(&events);
        }

        let mut events = Vec::new();
        let followers = Filter::new().kinds([FOLLOW_LIST]).tag("p", [user]);
        requester
            .request(Subscription::new(Vec::new(), vec![followers]), &mut |event: Event| events.push(event))
            .await
            .with_context(|| format!("Failed to load followers of {user}"))?;
        graph.ingest_all(&events);

        debug!(
            user,
            follows = follows.len(),
            followers = graph.followers(user).len(),
            scored = graph.scores.len(),
            max_score = graph.max_score,
            "loaded social graph"
        );
        Ok(graph)
    }

    /// Ingest one event; see [`ingest_all`](Self::ingest_all).
    pub fn ingest(&mut self, event: &Event) {
        self.ingest_all(std::slice::from_ref(event));
    }

    /// Ingest follow and mute lists, ignoring other kinds and stale lists,
    /// then recompute trust scores.
    pub fn ingest_all(&mut self, events: &[Event]) {
        for event in events {
            let lists = match event.kind {
                Kind::ContactList => &mut self.follows,
                Kind::MuteList => &mut self.mutes,
                _ => continue,
            };

            let created_at = event.created_at.as_u64();
            let author = event.pubkey.to_hex();
            if lists.get(&author).is_some_and(|list| list.created_at > created_at) {
                continue;
            }

            let pubkeys = event
                .tags
                .iter()
                .filter_map(|tag| match tag.as_slice() {
                    [name, pubkey, ..] if name == "p" => Some(pubkey.clone()),
                    _ => None,
                })
                .collect();

            lists.insert(author, PubkeyList { created_at, pubkeys });
        }

        self.rebuild_scores();
    }

    /// Replace an author's follow list.
    pub fn set_follows(&mut self, author: &str, pubkeys: impl IntoIterator<Item = impl Into<String>>) {
        set_list(&mut self.follows, author, pubkeys);
        self.rebuild_scores();
    }

    /// Replace an author's mute list.
    pub fn set_mutes(&mut self, author: &str, pubkeys: impl IntoIterator<Item = impl Into<String>>) {
        set_list(&mut self.mutes, author, pubkeys);
        self.rebuild_scores();
    }

    pub fn follows(&self, pubkey: &str) -> BTreeSet<String> {
        self.follows
            .get(pubkey)
            .map(|list| list.pubkeys.clone())
            .unwrap_or_default()
    }

    pub fn mutes(&self, pubkey: &str) -> BTreeSet<String> {
        self.mutes
            .get(pubkey)
            .map(|list| list.pubkeys.clone())
            .unwrap_or_default()
    }

    /// Authors whose follow list contains `pubkey`.
    pub fn followers(&self, pubkey: &str) -> BTreeSet<String> {
        self.follows
            .iter()
            .filter(|(_, list)| list.pubkeys.contains(pubkey))
            .map(|(author, _)| author.clone())
            .collect()
    }

    /// Follows of follows, minus `pubkey` and its direct follows.
    pub fn network(&self, pubkey: &str) -> BTreeSet<String> {
        let direct = self.follows(pubkey);
        direct
            .iter()
            .flat_map(|follow| self.follows(follow))
            .filter(|candidate| candidate != pubkey && !direct.contains(candidate))
            .collect()
    }

    /// Authors whose mute list contains `pubkey`.
    pub fn muters(&self, pubkey: &str) -> BTreeSet<String> {
        self.mutes
            .iter()
            .filter(|(_, list)| list.pubkeys.contains(pubkey))
            .map(|(author, _)| author.clone())
            .collect()
    }

    /// Trust in `target` as seen from `pubkey`: its follows that follow the
    /// target minus its follows that mute it. Without a viewpoint every
    /// follower and muter counts.
    pub fn score_for(&self, pubkey: Option<&str>, target: &str) -> i64 {
        let (followers, muters) = match pubkey {
            Some(pubkey) => {
                let follows = self.follows(pubkey);
                let followers = follows
                    .iter()
                    .filter(|other| self.follows.get(*other).is_some_and(|l| l.pubkeys.contains(target)))
                    .count();
                let muters = follows
                    .iter()
                    .filter(|other| self.mutes.get(*other).is_some_and(|l| l.pubkeys.contains(target)))
                    .count();
                (followers, muters)
            }
            None => (self.followers(target).len(), self.muters(target).len()),
        };
        followers as i64 - muters as i64
    }

    pub fn score(&self, pubkey: &str) -> i64 {
        self.scores.get(pubkey).copied().unwrap_or_default()
    }

    pub fn max_score(&self) -> i64 {
        self.max_score
    }

    fn rebuild_scores(&mut self) {
        let raters: Vec<String> = match &self.user {
            Some(user) => self.follows(user).into_iter().collect(),
            None => self.follows.keys().cloned().collect(),
        };

        let mut scores: HashMap<String, i64> = HashMap::new();
        for rater in &raters {
            for followed in self.follows.get(rater).into_iter().flat_map(|l| &l.pubkeys) {
                *scores.entry(followed.clone()).or_default() += 1;
            }
            for muted in self.mutes.get(rater).into_iter().flat_map(|l| &l.pubkeys) {
                *scores.entry(muted.clone()).or_default() -= 1;
            }
        }

        self.max_score = scores.values().copied().max().unwrap_or_default();
        self.scores = scores;
    }
}

fn set_list(
    lists: &mut HashMap<String, PubkeyList>,
    author: &str,
    pubkeys: impl IntoIterator<Item = impl Into<String>>,
) {
    let created_at = lists.get(author).map_or(0, |list| list.created_at);
    lists.insert(
        author.to_string(),
        PubkeyList {
            created_at,
            pubkeys: pubkeys.into_iter().map(Into::into).collect(),
        },
    );
}

impl ScopeResolver for SocialGraph {
    fn pubkeys_for_scope(&self, scope: Scope) -> BTreeSet<String> {
        let Some(user) = self.user.as_deref() else {
            return BTreeSet::new();
        };

        match scope {
            Scope::User => BTreeSet::from([user.to_string()]),
            Scope::Follows => self.follows(user),
            Scope::Network => self.network(user),
            Scope::Followers => self.followers(user),
        }
    }
}

impl TrustResolver for SocialGraph {
    fn pubkeys_for_trust_range(&self, min: f64, max: f64) -> BTreeSet<String> {
        let low = min * self.max_score as f64;
        let high = max * self.max_score as f64;

        self.scores
            .iter()
            .filter(|(_, score)| {
                let score = **score as f64;
                score >= low && score <= high
            })
            .map(|(pubkey, _)| pubkey.clone())
            .collect()
    }
}
