//! Feed trees: declarative descriptions of which events a client wants.
//!
//! Feeds travel as JSON tuples, `["kind", 1, 7]` or
//! `["union", ["author", "ab.."], ["tag", "#t", "rust"]]`. A node whose tag is
//! not recognised decodes to [`Feed::Unknown`] so a tree written by a newer
//! client can still be inspected and rejected cleanly.

use crate::error::{FeedError, Result};
use crate::filter::tag_key;
use crate::tags::{default_mappings, TagFeedMapping};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Social-graph relative selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The configured user.
    #[serde(rename = "self")]
    User,
    Follows,
    Network,
    Followers,
}

/// Which bound of a [`CreatedAtItem`] is an offset from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeBound {
    Since,
    Until,
}

/// A time window. Relative bounds are seconds before the compile-time "now".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedAtItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relative: Vec<RelativeBound>,
}

impl CreatedAtItem {
    /// Absolute `(since, until)` for the given now. Relative offsets saturate at zero.
    pub fn resolve(&self, now: u64) -> (Option<u64>, Option<u64>) {
        let resolve = |bound: Option<u64>, kind: RelativeBound| {
            bound.map(|value| {
                if self.relative.contains(&kind) {
                    now.saturating_sub(value)
                } else {
                    value
                }
            })
        };

        (
            resolve(self.since, RelativeBound::Since),
            resolve(self.until, RelativeBound::Until),
        )
    }
}

/// Trust window, as fractions of the highest trust score in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WotItem {
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_wot_max")]
    pub max: f64,
}

fn default_wot_max() -> f64 {
    1.0
}

impl Default for WotItem {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// A request to a data vending machine whose response tags become sub-feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvmItem {
    pub kind: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relays: Option<Vec<String>>,
    #[serde(default = "default_mappings")]
    pub mappings: Vec<TagFeedMapping>,
}

/// Lists (by address) whose tags become sub-feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub addresses: Vec<String>,
    #[serde(default = "default_mappings")]
    pub mappings: Vec<TagFeedMapping>,
}

/// A feed tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Feed {
    Union(Vec<Feed>),
    Intersection(Vec<Feed>),
    Address(Vec<String>),
    Author(Vec<String>),
    Id(Vec<String>),
    Kind(Vec<u16>),
    Relay(Vec<String>),
    /// Tag query; `key` carries the `#` prefix.
    Tag { key: String, values: Vec<String> },
    Search(Vec<String>),
    Scope(Vec<Scope>),
    CreatedAt(Vec<CreatedAtItem>),
    Wot(Vec<WotItem>),
    Dvm(Vec<DvmItem>),
    List(Vec<ListItem>),
    /// A node with an unrecognised type tag.
    Unknown { tag: String, args: Vec<Value> },
}

impl Feed {
    /// Tag query feed; `t` and `#t` are equivalent.
    pub fn tag(key: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Tag {
            key: tag_key(key),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// The wire type tag of this node.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Union(_) => "union",
            Self::Intersection(_) => "intersection",
            Self::Address(_) => "address",
            Self::Author(_) => "author",
            Self::Id(_) => "id",
            Self::Kind(_) => "kind",
            Self::Relay(_) => "relay",
            Self::Tag { .. } => "tag",
            Self::Search(_) => "search",
            Self::Scope(_) => "scope",
            Self::CreatedAt(_) => "created_at",
            Self::Wot(_) => "wot",
            Self::Dvm(_) => "dvm",
            Self::List(_) => "list",
            Self::Unknown { tag, .. } => tag.as_str(),
        }
    }

    /// Children of a combinator node, empty for leaves.
    pub fn sub_feeds(&self) -> &[Feed] {
        match self {
            Self::Union(feeds) | Self::Intersection(feeds) => feeds,
            _ => &[],
        }
    }

    /// Visit this node and then every descendant, depth first.
    pub fn walk<F: FnMut(&Feed)>(&self, visit: &mut F) {
        visit(self);
        for feed in self.sub_feeds() {
            feed.walk(visit);
        }
    }

    /// Encode as a JSON tuple.
    pub fn to_value(&self) -> Value {
        let mut tuple = vec![Value::String(self.type_name().to_string())];

        match self {
            Self::Union(feeds) | Self::Intersection(feeds) => {
                tuple.extend(feeds.iter().map(Feed::to_value));
            }
            Self::Address(values)
            | Self::Author(values)
            | Self::Id(values)
            | Self::Relay(values)
            | Self::Search(values) => tuple.extend(values.iter().cloned().map(Value::String)),
            Self::Kind(kinds) => tuple.extend(kinds.iter().map(|kind| Value::from(*kind))),
            Self::Tag { key, values } => {
                tuple.push(Value::String(key.clone()));
                tuple.extend(values.iter().cloned().map(Value::String));
            }
            Self::Scope(items) => tuple.extend(encode_args(items)),
            Self::CreatedAt(items) => tuple.extend(encode_args(items)),
            Self::Wot(items) => tuple.extend(encode_args(items)),
            Self::Dvm(items) => tuple.extend(encode_args(items)),
            Self::List(items) => tuple.extend(encode_args(items)),
            Self::Unknown { args, .. } => tuple.extend(args.iter().cloned()),
        }

        Value::Array(tuple)
    }

    /// Decode a JSON tuple.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(tuple) = value else {
            return Err(FeedError::MalformedFeed(format!("expected an array, got {value}")));
        };

        let mut tuple = tuple.into_iter();
        let tag = match tuple.next() {
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(FeedError::MalformedFeed(format!("expected a type tag, got {other}")))
            }
            None => return Err(FeedError::MalformedFeed("empty feed".to_string())),
        };
        let args: Vec<Value> = tuple.collect();

        let feed = match tag.as_str() {
            "union" => Self::Union(decode_feeds(args)?),
            "intersection" => Self::Intersection(decode_feeds(args)?),
            "address" => Self::Address(decode_args(&tag, args)?),
            "author" => Self::Author(decode_args(&tag, args)?),
            "id" => Self::Id(decode_args(&tag, args)?),
            "kind" => Self::Kind(decode_args(&tag, args)?),
            "relay" => Self::Relay(decode_args(&tag, args)?),
            "search" => Self::Search(decode_args(&tag, args)?),
            "scope" => Self::Scope(decode_args(&tag, args)?),
            "created_at" => Self::CreatedAt(decode_args(&tag, args)?),
            "wot" => Self::Wot(decode_args(&tag, args)?),
            "dvm" => Self::Dvm(decode_args(&tag, args)?),
            "list" => Self::List(decode_args(&tag, args)?),
            "tag" => {
                let mut values: Vec<String> = decode_args(&tag, args)?;
                if values.is_empty() {
                    return Err(FeedError::MalformedFeed("tag feed without a key".to_string()));
                }
                let key = values.remove(0);
                Self::Tag {
                    key: tag_key(&key),
                    values,
                }
            }
            _ => Self::Unknown { tag, args },
        };

        Ok(feed)
    }

    /// Parse a feed from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| FeedError::MalformedFeed(e.to_string()))?;
        Self::from_value(value)
    }
}

fn encode_args<T: Serialize>(items: &[T]) -> impl Iterator<Item = Value> + '_ {
    items
        .iter()
        .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
}

fn decode_args<T: DeserializeOwned>(tag: &str, args: Vec<Value>) -> Result<Vec<T>> {
    args.into_iter()
        .map(|arg| {
            serde_json::from_value(arg).map_err(|e| FeedError::MalformedFeed(format!("{tag}: {e}")))
        })
        .collect()
}

fn decode_feeds(args: Vec<Value>) -> Result<Vec<Feed>> {
    args.into_iter().map(Feed::from_value).collect()
}

impl Serialize for Feed {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Feed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Feed::from_value(value).map_err(serde::de::Error::custom)
    }
}
