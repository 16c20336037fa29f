//! Renders new-item batches and hands them to the configured sink.
//!
//! Delivery is fire-and-forget: a failing sink is logged and the batch is
//! dropped. Checkpoints advance regardless, so notification is best effort
//! while detection stays at-least-once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::config::{Config, SinkKind};
use crate::model::{ChangeResult, Direction, Item};

const TELEGRAM_MAX_CHARS: usize = 4096;

/// One rendered batch, ready for a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub stream_id: String,
    pub title: String,
    pub lines: Vec<String>,
}

impl Notification {
    pub fn to_text(&self) -> String {
        let mut out = self.title.clone();
        for line in &self.lines {
            out.push('\n');
            out.push_str(line);
        }
        out
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    operator_id: String,
    include_operator_items: bool,
    max_text_chars: usize,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, operator_id: impl Into<String>) -> Self {
        Self {
            sink,
            operator_id: operator_id.into(),
            include_operator_items: true,
            max_text_chars: 100,
        }
    }

    /// When false, items written by the operator are not reported.
    pub fn include_operator_items(mut self, include: bool) -> Self {
        self.include_operator_items = include;
        self
    }

    /// Truncate item text past this many characters. Zero disables truncation.
    pub fn max_text_chars(mut self, max: usize) -> Self {
        self.max_text_chars = max;
        self
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let sink: Arc<dyn NotificationSink> = match cfg.notify.sink {
            SinkKind::Log => Arc::new(LogSink),
            SinkKind::Console => Arc::new(ConsoleSink),
            SinkKind::File => {
                let path = cfg
                    .notify
                    .file_path
                    .clone()
                    .context("notify.file_path missing")?;
                Arc::new(FileSink::new(path))
            }
            SinkKind::Telegram => {
                let tg = cfg
                    .notify
                    .telegram
                    .as_ref()
                    .context("notify.telegram missing")?;
                Arc::new(TelegramSink::new(&tg.bot_token, tg.chat_id))
            }
        };
        Ok(Self::new(sink, cfg.app.operator_id.clone())
            .include_operator_items(cfg.notify.include_operator_items)
            .max_text_chars(cfg.notify.max_text_chars))
    }

    /// Render `result`, or `None` when nothing in it is reportable.
    pub fn render(&self, result: &ChangeResult) -> Option<Notification> {
        let lines: Vec<String> = result
            .new_items
            .iter()
            .filter(|item| {
                self.include_operator_items
                    || Direction::of(item, &self.operator_id) == Direction::Incoming
            })
            .map(|item| self.format_item(item, &result.display_name))
            .collect();
        if lines.is_empty() {
            return None;
        }
        Some(Notification {
            stream_id: result.stream_id.clone(),
            title: format!("{} new item(s) from {}", lines.len(), result.display_name),
            lines,
        })
    }

    pub fn format_item(&self, item: &Item, display_name: &str) -> String {
        let route = match Direction::of(item, &self.operator_id) {
            Direction::Incoming => format!("{} -> you", display_name),
            Direction::Outgoing => format!("you -> {}", display_name),
        };
        let mut parts = vec![
            format!("[{}]", item.created_at.format("%Y-%m-%d %H:%M:%S")),
            format!("{}:", route),
        ];
        if !item.text.is_empty() {
            parts.push(format!("\"{}\"", truncate(&item.text, self.max_text_chars)));
        }
        if item.media_count > 0 {
            parts.push(format!("[{} media]", item.media_count));
        }
        if item.price_minor_units > 0 {
            parts.push(format!("[{}]", format_price(item.price_minor_units)));
        }
        parts.push(format!("(id {})", item.id));
        parts.join(" ")
    }

    /// Render and deliver. Returns whether a notification reached the sink.
    #[instrument(skip_all, fields(stream_id = %result.stream_id))]
    pub async fn emit(&self, result: &ChangeResult) -> bool {
        let Some(notification) = self.render(result) else {
            return false;
        };
        match self.sink.deliver(&notification).await {
            Ok(()) => true,
            Err(err) => {
                warn!(?err, kind = "sink_error", "failed to deliver notification");
                false
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

fn format_price(minor: u64) -> String {
    format!("${}.{:02}", minor / 100, minor % 100)
}

/// Writes batches to the tracing log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, n: &Notification) -> Result<()> {
        info!(stream_id = %n.stream_id, "{}", n.title);
        for line in &n.lines {
            info!(stream_id = %n.stream_id, "{}", line);
        }
        Ok(())
    }
}

/// Prints batches to stdout between separator rules.
pub struct ConsoleSink;

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn deliver(&self, n: &Notification) -> Result<()> {
        let rule = "=".repeat(60);
        println!("{}\n{}\n{}\n{}", rule, n.title, n.lines.join("\n"), rule);
        Ok(())
    }
}

/// Appends batches to a text file.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl NotificationSink for FileSink {
    async fn deliver(&self, n: &Notification) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut body = n.to_text();
        body.push_str("\n\n");
        file.write_all(body.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }
}

/// Sends batches to a Telegram chat.
pub struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramSink {
    pub fn new(bot_token: &str, chat_id: i64) -> Self {
        Self {
            bot: Bot::new(bot_token),
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, n: &Notification) -> Result<()> {
        let text = truncate(&n.to_text(), TELEGRAM_MAX_CHARS - 3);
        self.bot
            .send_message(self.chat_id, text)
            .await
            .context("telegram send_message failed")?;
        Ok(())
    }
}
