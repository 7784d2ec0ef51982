//! `snowfeed`: compile Nostr feed definitions into optimized relay subscriptions.

pub mod config;
pub mod feed_cli;

pub use config::Config;
pub use feed_cli::FeedCommands;
