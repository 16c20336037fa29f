//! Turns a freshly fetched page plus the stored checkpoint into the ordered
//! list of new items for one stream.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::{text_hash, ChangeResult, Checkpoint, Item, Stream};

/// Which rule decided the outcome of one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The reader returned nothing.
    EmptyPage,
    /// First observation; checkpoint seeded from the head.
    Bootstrapped,
    /// Head is still the last seen item.
    Unchanged,
    /// Head is older than the last seen item; the read was stale.
    Stale,
    /// New items found and the last seen item was located on the page.
    NewItems,
    /// The whole page is newer than the checkpoint; older new items may have
    /// fallen outside the page.
    Overflow,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::EmptyPage => "empty_page",
            Outcome::Bootstrapped => "bootstrapped",
            Outcome::Unchanged => "unchanged",
            Outcome::Stale => "stale_page",
            Outcome::NewItems => "new_items",
            Outcome::Overflow => "page_overflow",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub outcome: Outcome,
    pub result: ChangeResult,
    /// Checkpoint to store, or `None` to leave the stored one untouched.
    pub checkpoint: Option<Checkpoint>,
}

/// Detect new items in `page` (newest first) relative to `checkpoint`.
///
/// Never fails: an empty page yields an empty result. The returned
/// checkpoint, when present, never has a lower `last_seen_id` than the input.
pub fn detect(
    stream: &Stream,
    page: &[Item],
    checkpoint: Option<&Checkpoint>,
    now: DateTime<Utc>,
) -> Detection {
    let empty = |outcome| Detection {
        outcome,
        result: ChangeResult::empty(stream, now),
        checkpoint: None,
    };

    let Some(head) = page.first() else {
        debug!(stream_id = %stream.id, "empty page");
        return empty(Outcome::EmptyPage);
    };

    let Some(last) = checkpoint else {
        debug!(stream_id = %stream.id, head_id = head.id, "first observation; seeding checkpoint");
        return Detection {
            checkpoint: Some(Checkpoint::at(head, now)),
            ..empty(Outcome::Bootstrapped)
        };
    };

    if head.id == last.last_seen_id {
        if text_hash(&head.text) != last.last_seen_text_hash {
            debug!(stream_id = %stream.id, head_id = head.id, "head text changed since last cycle");
        }
        return empty(Outcome::Unchanged);
    }

    if head.id < last.last_seen_id {
        warn!(
            stream_id = %stream.id,
            kind = "stale_page",
            head_id = head.id,
            last_seen_id = last.last_seen_id,
            "page head is older than checkpoint; deferring to next cycle"
        );
        return empty(Outcome::Stale);
    }

    // Ids are monotonic, so anything at or below the checkpoint has been
    // seen even if the exact last-seen item is gone from the page.
    let fresh = page
        .iter()
        .take_while(|item| item.id > last.last_seen_id)
        .count();
    let outcome = if fresh == page.len() {
        warn!(
            stream_id = %stream.id,
            kind = "page_overflow",
            page_len = page.len(),
            last_seen_id = last.last_seen_id,
            "checkpoint not found on page; emitting whole page, older items may be missed"
        );
        Outcome::Overflow
    } else {
        Outcome::NewItems
    };

    let mut new_items: Vec<Item> = page[..fresh].to_vec();
    new_items.reverse();

    Detection {
        outcome,
        result: ChangeResult {
            new_items,
            ..ChangeResult::empty(stream, now)
        },
        checkpoint: Some(Checkpoint::at(head, now)),
    }
}
