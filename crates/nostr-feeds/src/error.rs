//! Error types for feed decoding and compilation.

use thiserror::Error;

/// Errors raised while decoding or compiling a feed.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The feed contains a node whose type this crate does not know.
    #[error("Unable to convert feed of type {0} to filters")]
    UnsupportedFeedType(String),

    /// A provider response carried a `request` tag that could not be parsed.
    #[error("Malformed provider response {event_id}: {reason}")]
    MalformedProviderResponse { event_id: String, reason: String },

    /// A collaborator port failed. Retries are the port's business.
    #[error("{port} port failed: {source}")]
    PortFailure {
        port: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Feed JSON is not a valid tuple encoding.
    #[error("Malformed feed: {0}")]
    MalformedFeed(String),
}

impl FeedError {
    pub(crate) fn port(port: &'static str, source: anyhow::Error) -> Self {
        Self::PortFailure { port, source }
    }
}

pub type Result<T, E = FeedError> = std::result::Result<T, E>;
