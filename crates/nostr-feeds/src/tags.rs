//! Turning event tags into sub-feeds.
//!
//! Lists and provider responses describe content with tags (`p` for people,
//! `t` for topics, ...). A [`TagFeedMapping`] says which feed type the values
//! of a given tag name become.

use crate::error::{FeedError, Result};
use crate::feed::Feed;
use crate::filter::tag_key;
use nostr_sdk::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Feed type produced from a tag's values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingTarget {
    Address,
    Author,
    Id,
    Kind,
    Relay,
    Search,
    /// Tag query under the given `#x` key.
    Tag(String),
}

impl MappingTarget {
    /// Build the sub-feed for these values. `None` when nothing usable remains.
    pub fn feed(&self, values: Vec<String>) -> Option<Feed> {
        if values.is_empty() {
            return None;
        }

        let feed = match self {
            Self::Address => Feed::Address(values),
            Self::Author => Feed::Author(values),
            Self::Id => Feed::Id(values),
            Self::Relay => Feed::Relay(values),
            Self::Search => Feed::Search(values),
            Self::Tag(key) => Feed::Tag {
                key: key.clone(),
                values,
            },
            Self::Kind => {
                let kinds: Vec<u16> = values
                    .iter()
                    .filter_map(|value| match value.parse() {
                        Ok(kind) => Some(kind),
                        Err(_) => {
                            debug!(value = %value, "skipping non-numeric kind tag");
                            None
                        }
                    })
                    .collect();

                if kinds.is_empty() {
                    return None;
                }
                Feed::Kind(kinds)
            }
        };

        Some(feed)
    }
}

/// `[tagName, target]`, e.g. `["p", ["author"]]` or `["t", ["tag", "#t"]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(String, Vec<String>)", into = "(String, Vec<String>)")]
pub struct TagFeedMapping {
    pub tag: String,
    pub target: MappingTarget,
}

impl TagFeedMapping {
    pub fn new(tag: impl Into<String>, target: MappingTarget) -> Self {
        Self {
            tag: tag.into(),
            target,
        }
    }
}

impl TryFrom<(String, Vec<String>)> for TagFeedMapping {
    type Error = String;

    fn try_from((tag, target): (String, Vec<String>)) -> std::result::Result<Self, Self::Error> {
        let target = match target.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["address"] => MappingTarget::Address,
            ["author"] => MappingTarget::Author,
            ["id"] => MappingTarget::Id,
            ["kind"] => MappingTarget::Kind,
            ["relay"] => MappingTarget::Relay,
            ["search"] => MappingTarget::Search,
            ["tag", key] => MappingTarget::Tag(tag_key(key)),
            other => return Err(format!("unsupported mapping target {other:?} for tag {tag}")),
        };

        Ok(Self { tag, target })
    }
}

impl From<TagFeedMapping> for (String, Vec<String>) {
    fn from(mapping: TagFeedMapping) -> Self {
        let target = match mapping.target {
            MappingTarget::Address => vec!["address".to_string()],
            MappingTarget::Author => vec!["author".to_string()],
            MappingTarget::Id => vec!["id".to_string()],
            MappingTarget::Kind => vec!["kind".to_string()],
            MappingTarget::Relay => vec!["relay".to_string()],
            MappingTarget::Search => vec!["search".to_string()],
            MappingTarget::Tag(key) => vec!["tag".to_string(), key],
        };
        (mapping.tag, target)
    }
}

/// Mappings used when a list or provider item does not name its own.
pub fn default_mappings() -> Vec<TagFeedMapping> {
    vec![
        TagFeedMapping::new("a", MappingTarget::Address),
        TagFeedMapping::new("e", MappingTarget::Id),
        TagFeedMapping::new("p", MappingTarget::Author),
        TagFeedMapping::new("r", MappingTarget::Relay),
        TagFeedMapping::new("t", MappingTarget::Tag("#t".to_string())),
    ]
}

/// Tags of an event as plain string vectors.
pub fn event_tags(event: &Event) -> Vec<Vec<String>> {
    event.tags.iter().map(|tag| tag.as_slice().to_vec()).collect()
}

/// One sub-feed per mapping whose tag name occurs in `tags`.
pub fn feeds_from_tags(tags: &[Vec<String>], mappings: &[TagFeedMapping]) -> Vec<Feed> {
    mappings
        .iter()
        .filter_map(|mapping| {
            let values: Vec<String> = tags
                .iter()
                .filter(|tag| tag.first() == Some(&mapping.tag))
                .filter_map(|tag| tag.get(1).cloned())
                .collect();
            mapping.target.feed(values)
        })
        .collect()
}

/// Tags of a provider response, minus tags echoing the original request.
///
/// The `request` tag holds the JSON request event; tags whose value is that
/// request's id or pubkey are dropped. A `request` tag that is not valid JSON
/// makes the whole response unusable.
pub fn provider_response_tags(event: &Event) -> Result<Vec<Vec<String>>> {
    let tags = event_tags(event);

    let echoed: Vec<String> = match tags.iter().find(|tag| tag.first().map(String::as_str) == Some("request")) {
        None => Vec::new(),
        Some(tag) => {
            let raw = tag.get(1).map(String::as_str).unwrap_or_default();
            let request: Value =
                serde_json::from_str(raw).map_err(|e| FeedError::MalformedProviderResponse {
                    event_id: event.id.to_hex(),
                    reason: e.to_string(),
                })?;

            ["id", "pubkey"]
                .iter()
                .filter_map(|key| request.get(key).and_then(Value::as_str).map(str::to_string))
                .collect()
        }
    };

    Ok(tags
        .into_iter()
        .filter(|tag| !tag.get(1).is_some_and(|value| echoed.contains(value)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::{EventBuilder, JsonUtil, Keys, Kind, Tag, TagKind};

    fn tag(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn nostr_tag(parts: &[&str]) -> Tag {
        Tag::custom(
            TagKind::custom(parts[0].to_string()),
            parts[1..].iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn mapping_json_shape() {
        let mapping: TagFeedMapping = serde_json::from_str(r#"["t", ["tag", "t"]]"#).unwrap();
        assert_eq!(mapping, TagFeedMapping::new("t", MappingTarget::Tag("#t".to_string())));

        let json = serde_json::to_string(&TagFeedMapping::new("p", MappingTarget::Author)).unwrap();
        assert_eq!(json, r#"["p",["author"]]"#);

        assert!(serde_json::from_str::<TagFeedMapping>(r#"["p", ["people"]]"#).is_err());
    }

    #[test]
    fn feeds_from_tags_groups_values_per_mapping() {
        let tags = vec![
            tag(&["p", "alice"]),
            tag(&["t", "rust"]),
            tag(&["p", "bob"]),
            tag(&["k", "1"]),
            tag(&["k", "note"]),
            tag(&["p"]),
        ];
        let mappings = vec![
            TagFeedMapping::new("p", MappingTarget::Author),
            TagFeedMapping::new("t", MappingTarget::Tag("#t".to_string())),
            TagFeedMapping::new("k", MappingTarget::Kind),
            TagFeedMapping::new("r", MappingTarget::Relay),
        ];

        let feeds = feeds_from_tags(&tags, &mappings);
        assert_eq!(
            feeds,
            vec![
                Feed::Author(vec!["alice".into(), "bob".into()]),
                Feed::tag("t", ["rust"]),
                Feed::Kind(vec![1]),
            ]
        );
    }

    #[test]
    fn response_without_request_tag_keeps_all_tags() {
        let keys = Keys::generate();
        let response = EventBuilder::new(Kind::from(6300), "")
            .tags([nostr_tag(&["p", "alice"]), nostr_tag(&["e", "abc"])])
            .sign_with_keys(&keys)
            .unwrap();

        let tags = provider_response_tags(&response).unwrap();
        assert_eq!(tags, vec![tag(&["p", "alice"]), tag(&["e", "abc"])]);
    }

    #[test]
    fn response_drops_echoed_values() {
        let keys = Keys::generate();
        let request = EventBuilder::new(Kind::from(5300), "")
            .sign_with_keys(&keys)
            .unwrap();
        let request_id = request.id.to_hex();
        let request_pubkey = request.pubkey.to_hex();

        let response = EventBuilder::new(Kind::from(6300), "")
            .tags([
                nostr_tag(&["request", &request.as_json()]),
                nostr_tag(&["e", &request_id]),
                nostr_tag(&["p", &request_pubkey]),
                nostr_tag(&["p", "carol"]),
            ])
            .sign_with_keys(&Keys::generate())
            .unwrap();

        let tags = provider_response_tags(&response).unwrap();
        assert!(tags.contains(&tag(&["p", "carol"])));
        assert!(!tags.iter().any(|t| t.get(1) == Some(&request_id)));
        assert!(!tags.iter().any(|t| t.get(1) == Some(&request_pubkey)));
    }

    #[test]
    fn malformed_request_tag_is_an_error() {
        let response = EventBuilder::new(Kind::from(6300), "")
            .tags([nostr_tag(&["request", "{not json"]), nostr_tag(&["p", "carol"])])
            .sign_with_keys(&Keys::generate())
            .unwrap();

        assert!(matches!(
            provider_response_tags(&response),
            Err(FeedError::MalformedProviderResponse { .. })
        ));
    }
}
