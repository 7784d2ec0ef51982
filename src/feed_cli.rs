use anyhow::{Context, Result};
use clap::Subcommand;
use nostr_feeds::nostr_sdk::{Keys, SecretKey};
use nostr_feeds::{
    optimize_subscriptions, Feed, FeedCompiler, FeedPorts, FixedClock, Offline, RelayClient,
    SocialGraph, Subscription,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{read_input, Config};

#[derive(Subcommand, Debug)]
pub enum FeedCommands {
    /// Check whether a feed can be compiled and count its nodes
    Check {
        /// Feed JSON file
        file: PathBuf,
    },
    /// Compile a feed into request items
    Compile {
        /// Feed JSON file
        file: PathBuf,
        /// Unix time to resolve relative windows against (defaults to now)
        #[clap(long)]
        now: Option<u64>,
        /// Do not contact relays; lists resolve empty and providers fail
        #[clap(long)]
        offline: bool,
        /// Route items to relays and print one merged subscription per relay
        #[clap(long)]
        optimize: bool,
    },
    /// Merge a JSON array of subscriptions into one subscription per relay
    Optimize {
        /// Subscriptions JSON file
        file: PathBuf,
    },
}

/// Result of `snowfeed check`.
#[derive(Debug, Serialize, PartialEq)]
pub struct CheckReport {
    pub compilable: bool,
    pub nodes: BTreeMap<String, usize>,
}

pub async fn handle_command(cmd: FeedCommands, config: &Config) -> Result<()> {
    match cmd {
        FeedCommands::Check { file } => cmd_check(&file),
        FeedCommands::Compile {
            file,
            now,
            offline,
            optimize,
        } => cmd_compile(&file, now, offline, optimize, config).await,
        FeedCommands::Optimize { file } => cmd_optimize(&file),
    }
}

fn parse_feed(file: &Path) -> Result<Feed> {
    let json = read_input(file)?;
    Feed::from_json(&json).with_context(|| format!("Invalid feed in {}", file.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_check(file: &Path) -> Result<()> {
    let feed = parse_feed(file)?;
    print_json(&check(&feed))
}

/// Count nodes per type and decide whether the feed compiles.
pub fn check(feed: &Feed) -> CheckReport {
    let mut nodes = BTreeMap::new();
    feed.walk(&mut |node| *nodes.entry(node.type_name().to_string()).or_insert(0) += 1);

    let compiler = FeedCompiler::new(offline_ports(None));
    CheckReport {
        compilable: compiler.can_compile(feed),
        nodes,
    }
}

fn offline_ports(user: Option<String>) -> FeedPorts {
    FeedPorts::new(Arc::new(Offline), Arc::new(SocialGraph::new(user)))
}

fn load_keys(config: &Config) -> Result<Keys> {
    match &config.identity.nsec {
        Some(nsec) => {
            let secret_key = SecretKey::parse(nsec).map_err(|e| anyhow::anyhow!("Failed to parse nsec: {}", e))?;
            Ok(Keys::new(secret_key))
        }
        None => {
            debug!("No identity configured, signing provider requests with a throwaway key");
            Ok(Keys::generate())
        }
    }
}

async fn online_ports(config: &Config) -> Result<FeedPorts> {
    let keys = load_keys(config)?;
    let client = Arc::new(
        RelayClient::new(keys, config.relays.default.clone())
            .with_timeout(config.timeout())
            .with_provider_expiration(config.provider_expiration()),
    );

    let graph = match &config.identity.user {
        Some(user) => SocialGraph::load(client.as_ref(), user)
            .await
            .context("Failed to load social graph")?,
        None => SocialGraph::new(None),
    };

    Ok(FeedPorts::new(client, Arc::new(graph)))
}

async fn cmd_compile(
    file: &Path,
    now: Option<u64>,
    offline: bool,
    optimize: bool,
    config: &Config,
) -> Result<()> {
    let feed = parse_feed(file)?;

    let mut ports = if offline {
        offline_ports(config.identity.user.clone())
    } else {
        online_ports(config).await?
    };

    if let Some(now) = now {
        let at = i64::try_from(now)
            .ok()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .with_context(|| format!("--now {now} is out of range"))?;
        info!("Resolving relative windows against {}", at.to_rfc3339());
        ports = ports.with_clock(FixedClock(now));
    }

    let compiler = FeedCompiler::new(ports);
    let items = compiler
        .compile(&feed)
        .await
        .with_context(|| format!("Failed to compile {}", file.display()))?;
    info!("Compiled {} into {} request item(s)", file.display(), items.len());

    if optimize {
        let subscriptions: Vec<Subscription> = items
            .into_iter()
            .filter_map(|item| item.into_subscription(&config.relays.default))
            .collect();
        print_json(&plan(&subscriptions))
    } else {
        print_json(&items)
    }
}

fn cmd_optimize(file: &Path) -> Result<()> {
    let json = read_input(file)?;
    let subscriptions: Vec<Subscription> = serde_json::from_str(&json)
        .with_context(|| format!("Invalid subscriptions in {}", file.display()))?;
    print_json(&plan(&subscriptions))
}

/// One merged subscription per relay.
pub fn plan(subscriptions: &[Subscription]) -> Vec<Subscription> {
    let unrouted = nostr_feeds::unrouted(subscriptions).count();
    if unrouted > 0 {
        info!("{unrouted} subscription(s) name no relay and were left out");
    }
    optimize_subscriptions(subscriptions).collect()
}
