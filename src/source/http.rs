use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::Source;
use crate::model::{Item, Stream};
use crate::source::model::{items_from, streams_from, ChatListResp, MessageListResp};
use crate::source::{Freshness, StreamEnumerator, StreamReader};

/// REST client for the messaging API. Implements both the enumerator and
/// the reader. Authentication is not performed here; whatever session
/// headers the operator configures are sent verbatim.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    chat_page_size: usize,
    max_chat_pages: usize,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn from_config(cfg: &Source) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid source.base_url")?;
        let mut headers = HeaderMap::new();
        for (raw_name, raw_value) in &cfg.headers {
            let name = HeaderName::from_bytes(raw_name.as_bytes())
                .with_context(|| format!("invalid header name '{}'", raw_name))?;
            let value = HeaderValue::from_str(raw_value)
                .with_context(|| format!("invalid value for header '{}'", raw_name))?;
            headers.insert(name, value);
        }
        let http = Client::builder()
            .user_agent("chat-poller/0.1")
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            chat_page_size: cfg.chat_page_size,
            max_chat_pages: cfg.max_chat_pages,
        })
    }

    pub fn chats_request(&self, offset: usize) -> Result<reqwest::Request> {
        let mut url = self
            .base_url
            .join("api2/v2/chats")
            .context("invalid base URL")?;
        url.query_pairs_mut()
            .append_pair("limit", &self.chat_page_size.to_string())
            .append_pair("offset", &offset.to_string());
        self.http.get(url).build().context("failed to build chats request")
    }

    pub fn messages_request(
        &self,
        stream_id: &str,
        limit: usize,
        freshness: Freshness,
    ) -> Result<reqwest::Request> {
        let mut url = self
            .base_url
            .join(&format!("api2/v2/chats/{}/messages", stream_id))
            .context("invalid base URL")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("limit", &limit.to_string())
                .append_pair("order", "desc");
            if freshness == Freshness::ForceFresh {
                query.append_pair("_", &Utc::now().timestamp_millis().to_string());
            }
        }
        let mut req = self.http.get(url);
        if freshness == Freshness::ForceFresh {
            req = req.header(CACHE_CONTROL, "no-cache").header(PRAGMA, "no-cache");
        }
        req.build().context("failed to build messages request")
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        let url = request.url().clone();
        debug!(url = %url, "GET");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach {}", url.path()))?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(path = url.path(), "rate limited");
            return Err(anyhow!("received 429 from {}: {}", url.path(), body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", url.path(), status, body));
        }

        let body = res.bytes().await.context("failed to read response body")?;
        serde_json::from_slice(&body).with_context(|| format!("invalid JSON from {}", url.path()))
    }
}

#[async_trait]
impl StreamEnumerator for ApiClient {
    #[instrument(skip_all)]
    async fn list_streams(&self) -> Result<Vec<Stream>> {
        let mut streams = Vec::new();
        let mut offset = 0;
        for _ in 0..self.max_chat_pages {
            let resp: ChatListResp = self.execute(self.chats_request(offset)?).await?;
            let fetched = resp.list.len();
            let has_more = resp.has_more;
            streams.extend(streams_from(resp));
            if !has_more || fetched == 0 {
                return Ok(streams);
            }
            offset += fetched;
        }
        warn!(
            pages = self.max_chat_pages,
            streams = streams.len(),
            "chat list truncated at max_chat_pages"
        );
        Ok(streams)
    }
}

#[async_trait]
impl StreamReader for ApiClient {
    #[instrument(skip(self, freshness))]
    async fn fetch_recent(
        &self,
        stream_id: &str,
        limit: usize,
        freshness: Freshness,
    ) -> Result<Vec<Item>> {
        let request = self.messages_request(stream_id, limit, freshness)?;
        let resp: MessageListResp = self.execute(request).await?;
        let mut items = items_from(stream_id, resp, Utc::now());
        items.truncate(limit);
        Ok(items)
    }
}
