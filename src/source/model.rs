//! Wire shapes of the messaging API and their conversion into domain types.
//!
//! The API is loose about types: ids arrive as numbers or numeric strings,
//! prices as numbers or decimal strings, timestamps as RFC 3339 or unix
//! seconds. Fields are kept as raw JSON and normalised here.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::model::{Item, Stream};

#[derive(Deserialize, Debug, Default)]
pub struct ChatListResp {
    #[serde(default)]
    pub list: Vec<Value>,
    #[serde(default, rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Deserialize, Debug)]
pub struct ChatEntry {
    #[serde(rename = "withUser")]
    pub with_user: Option<UserRef>,
}

#[derive(Deserialize, Debug, Default)]
pub struct UserRef {
    #[serde(default)]
    pub id: Value,
    pub username: Option<String>,
    pub name: Option<String>,
}

/// Entries stay raw so one badly typed message cannot fail the whole page.
#[derive(Deserialize, Debug, Default)]
pub struct MessageListResp {
    #[serde(default)]
    pub list: Vec<Value>,
}

#[derive(Deserialize, Debug, Default)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Value,
    #[serde(default, rename = "fromUser")]
    pub from_user: Value,
    #[serde(default)]
    pub text: Value,
    #[serde(default)]
    pub price: Value,
    #[serde(default, rename = "mediaCount")]
    pub media_count: Value,
    #[serde(default)]
    pub media: Value,
    #[serde(default, rename = "createdAt")]
    pub created_at: Value,
}

/// Streams from one page of the chat list. Entries without a usable user id
/// are dropped.
pub fn streams_from(resp: ChatListResp) -> Vec<Stream> {
    resp.list
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            let entry = match serde_json::from_value::<ChatEntry>(entry) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(position, %err, kind = "malformed_item", "undecodable chat entry; skipping");
                    return None;
                }
            };
            let user = entry.with_user?;
            let id = id_string(&user.id)?;
            let display_name = user
                .username
                .filter(|s| !s.trim().is_empty())
                .or(user.name.filter(|s| !s.trim().is_empty()))
                .unwrap_or_else(|| id.clone());
            Some(Stream { id, display_name })
        })
        .collect()
}

/// Items of one message page, preserving the API's newest-first order.
/// Entries that are not objects or carry no numeric id are skipped and
/// logged; the rest of the page is still returned.
pub fn items_from(stream_id: &str, resp: MessageListResp, now: DateTime<Utc>) -> Vec<Item> {
    let mut items = Vec::with_capacity(resp.list.len());
    for (position, entry) in resp.list.into_iter().enumerate() {
        let raw = match serde_json::from_value::<RawMessage>(entry) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(stream_id, position, %err, kind = "malformed_item", "undecodable message; skipping");
                continue;
            }
        };
        let Some(id) = id_u64(&raw.id) else {
            warn!(stream_id, position, kind = "malformed_item", "message without id; skipping");
            continue;
        };
        let author_id = raw.from_user.get("id").and_then(id_string).unwrap_or_default();
        let text = match raw.text {
            Value::String(s) => s,
            _ => String::new(),
        };
        let media_count = count(&raw.media_count)
            .or_else(|| raw.media.as_array().map(|m| m.len() as u32))
            .unwrap_or(0);
        items.push(Item {
            id,
            stream_id: stream_id.to_string(),
            author_id,
            text,
            price_minor_units: minor_units(&raw.price),
            media_count,
            created_at: timestamp(&raw.created_at).unwrap_or(now),
        });
    }
    items
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn id_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count(v: &Value) -> Option<u32> {
    let n = match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    u32::try_from(n).ok()
}

/// Major-unit price (e.g. dollars) to minor units (cents). Negative or
/// unparsable prices count as free.
fn minor_units(v: &Value) -> u64 {
    let major = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match major {
        Some(p) if p.is_finite() && p > 0.0 => (p * 100.0).round() as u64,
        _ => 0,
    }
}

fn timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}
