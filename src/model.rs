use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One independently ordered source of items, e.g. a single conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub display_name: String,
}

impl Stream {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// An immutable upstream item. Ordering within a stream is by `id` only;
/// `created_at` is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub stream_id: String,
    pub author_id: String,
    pub text: String,
    pub price_minor_units: u64,
    pub media_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Who authored an item relative to the operator running the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written by the watched counterpart.
    Incoming,
    /// Written by the operator.
    Outgoing,
}

impl Direction {
    pub fn of(item: &Item, operator_id: &str) -> Self {
        if item.author_id == operator_id {
            Direction::Outgoing
        } else {
            Direction::Incoming
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

/// Last observed position in one stream. Serialized with the camelCase keys
/// of the persisted state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub last_seen_id: u64,
    pub last_seen_text_hash: String,
    pub last_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint positioned at `head`.
    pub fn at(head: &Item, now: DateTime<Utc>) -> Self {
        Self {
            last_seen_id: head.id,
            last_seen_text_hash: text_hash(&head.text),
            last_seen_at: head.created_at,
            updated_at: now,
        }
    }
}

/// New items found in one stream during one cycle, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeResult {
    pub stream_id: String,
    pub display_name: String,
    pub new_items: Vec<Item>,
    pub detected_at: DateTime<Utc>,
}

impl ChangeResult {
    pub fn empty(stream: &Stream, detected_at: DateTime<Utc>) -> Self {
        Self {
            stream_id: stream.id.clone(),
            display_name: stream.display_name.clone(),
            new_items: Vec::new(),
            detected_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new_items.is_empty()
    }
}

/// Lowercase hex SHA-256 of an item's text.
pub fn text_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
