//! Collaborators that expose the remote streams: an enumerator that lists
//! the streams to watch and a reader that returns the most recent items of
//! one stream.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Item, Stream};

pub mod http;
pub mod model;

pub use http::ApiClient;

/// How hard the reader should try to bypass upstream caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Any snapshot is acceptable.
    Cached,
    /// Ask the transport for an uncached read. Transports that cannot
    /// guarantee this may still return stale pages.
    ForceFresh,
}

#[async_trait]
pub trait StreamEnumerator: Send + Sync {
    /// Streams currently available to watch. Called once per cycle.
    async fn list_streams(&self) -> Result<Vec<Stream>>;
}

#[async_trait]
pub trait StreamReader: Send + Sync {
    /// Up to `limit` most recent items of `stream_id`, newest first.
    async fn fetch_recent(
        &self,
        stream_id: &str,
        limit: usize,
        freshness: Freshness,
    ) -> Result<Vec<Item>>;
}
