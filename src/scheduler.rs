//! Drives polling cycles: enumerate streams, fetch and diff each one, flush
//! checkpoints, sleep, repeat until stopped.
//!
//! Fetches may overlap up to `max_concurrency`, but detection and checkpoint
//! writes happen on the scheduler task as each fetch completes, in
//! enumeration order. The checkpoint store therefore has a single writer and
//! the durable flush runs once per cycle after every fetch has settled.

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::detector::{self, Outcome};
use crate::model::{Item, Stream};
use crate::notifier::Notifier;
use crate::source::{Freshness, StreamEnumerator, StreamReader};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub page_size: usize,
    pub stream_delay: Duration,
    pub poll_interval: Duration,
    pub max_concurrency: usize,
    pub freshness: Freshness,
    /// Stream ids or display names to watch; empty watches everything.
    pub allow_list: Vec<String>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            stream_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(60),
            max_concurrency: 1,
            freshness: Freshness::ForceFresh,
            allow_list: Vec::new(),
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            page_size: cfg.app.page_size,
            stream_delay: cfg.stream_delay(),
            poll_interval: cfg.poll_interval(),
            max_concurrency: cfg.app.max_concurrency.max(1),
            freshness: if cfg.source.force_fresh {
                Freshness::ForceFresh
            } else {
                Freshness::Cached
            },
            allow_list: cfg.source.streams.clone(),
        }
    }
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub enumerate_failed: bool,
    pub streams: usize,
    pub processed: usize,
    pub failed: usize,
    pub bootstrapped: usize,
    pub stale: usize,
    pub new_items: usize,
    pub notified: usize,
    pub flushed: bool,
    /// A stop signal cut the cycle short.
    pub interrupted: bool,
}

pub struct Scheduler {
    enumerator: Arc<dyn StreamEnumerator>,
    reader: Arc<dyn StreamReader>,
    notifier: Notifier,
    store: CheckpointStore,
    options: SchedulerOptions,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        enumerator: Arc<dyn StreamEnumerator>,
        reader: Arc<dyn StreamReader>,
        notifier: Notifier,
        store: CheckpointStore,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            enumerator,
            reader,
            notifier,
            store,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled. Clone it before handing the
    /// scheduler to `run`.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Finish the current stream, flush and exit. No new cycle starts.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run cycles until stopped, then flush once more.
    #[instrument(skip_all)]
    pub async fn run(&mut self) {
        info!(
            interval_secs = self.options.poll_interval.as_secs(),
            page_size = self.options.page_size,
            "starting poll loop"
        );
        while !self.cancel.is_cancelled() {
            let report = self.run_cycle().await;
            if report.interrupted {
                break;
            }
            debug!(
                wait_secs = self.options.poll_interval.as_secs(),
                "waiting until next cycle"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
        self.flush().await;
        info!("poll loop stopped");
    }

    /// One full cycle: enumerate, fetch/detect/persist each stream, flush.
    #[instrument(skip_all)]
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.enumerator.list_streams().await {
            Ok(all) => {
                let streams = self.select(all);
                report.streams = streams.len();
                if streams.is_empty() {
                    warn!("no streams to check");
                } else {
                    info!(streams = streams.len(), "checking streams");
                    self.poll_streams(streams, &mut report).await;
                }
            }
            Err(err) => {
                report.enumerate_failed = true;
                warn!(
                    error = %format!("{:#}", err),
                    kind = "enumerate_error",
                    "failed to list streams; retrying next cycle"
                );
            }
        }

        report.flushed = self.flush().await;

        if report.new_items == 0 {
            info!(
                processed = report.processed,
                failed = report.failed,
                bootstrapped = report.bootstrapped,
                "No new items found"
            );
        } else {
            info!(
                processed = report.processed,
                failed = report.failed,
                new_items = report.new_items,
                "cycle complete"
            );
        }
        report
    }

    async fn poll_streams(&mut self, streams: Vec<Stream>, report: &mut CycleReport) {
        let reader = Arc::clone(&self.reader);
        let cancel = self.cancel.clone();
        let limit = self.options.page_size;
        let freshness = self.options.freshness;
        let delay = self.options.stream_delay;

        let mut fetches = stream::iter(streams.into_iter().enumerate())
            .map(|(index, stream)| {
                let reader = Arc::clone(&reader);
                let cancel = cancel.clone();
                async move {
                    if index > 0 && !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return (stream, None),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    let fetched = reader.fetch_recent(&stream.id, limit, freshness).await;
                    (stream, Some(fetched))
                }
            })
            .buffered(self.options.max_concurrency.max(1));

        while let Some((stream, fetched)) = fetches.next().await {
            let Some(fetched) = fetched else {
                report.interrupted = true;
                break;
            };
            self.process(&stream, fetched, report).await;
            if self.cancel.is_cancelled() {
                info!(stream_id = %stream.id, "stop requested; ending cycle early");
                report.interrupted = true;
                break;
            }
        }
    }

    async fn process(&mut self, stream: &Stream, fetched: Result<Vec<Item>>, report: &mut CycleReport) {
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                report.failed += 1;
                warn!(
                    stream_id = %stream.id,
                    stream = %stream.display_name,
                    kind = "fetch_error",
                    error = %format!("{:#}", err),
                    "fetch failed; retrying next cycle"
                );
                return;
            }
        };
        report.processed += 1;
        debug!(stream_id = %stream.id, fetched = page.len(), "page fetched");

        let detection = detector::detect(stream, &page, self.store.get(&stream.id), Utc::now());
        match detection.outcome {
            Outcome::Bootstrapped => report.bootstrapped += 1,
            Outcome::Stale => report.stale += 1,
            _ => {}
        }
        if let Some(checkpoint) = detection.checkpoint {
            self.store.put(stream.id.clone(), checkpoint);
        }

        let result = detection.result;
        if !result.is_empty() {
            report.new_items += result.new_items.len();
            info!(
                stream_id = %stream.id,
                stream = %stream.display_name,
                new_items = result.new_items.len(),
                outcome = detection.outcome.as_str(),
                "found new items"
            );
            if self.notifier.emit(&result).await {
                report.notified += 1;
            }
        }
    }

    /// Drop duplicate ids and apply the allow-list.
    fn select(&self, all: Vec<Stream>) -> Vec<Stream> {
        let mut seen = HashSet::new();
        let unique: Vec<Stream> = all
            .into_iter()
            .filter(|s| seen.insert(s.id.clone()))
            .collect();

        let allow = &self.options.allow_list;
        if allow.is_empty() {
            return unique;
        }
        let wanted = |s: &Stream| allow.iter().any(|w| *w == s.id || *w == s.display_name);
        for entry in allow {
            if !unique.iter().any(|s| *entry == s.id || *entry == s.display_name) {
                warn!(stream = %entry, "could not find stream from allow-list");
            }
        }
        unique.into_iter().filter(|s| wanted(s)).collect()
    }

    async fn flush(&self) -> bool {
        match self.store.save().await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    ?err,
                    kind = "persist_error",
                    "failed to flush checkpoints; keeping in-memory state"
                );
                false
            }
        }
    }
}
