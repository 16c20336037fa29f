use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use chat_poller::checkpoint::{self, CheckpointStore};
use chat_poller::config;
use chat_poller::notifier::Notifier;
use chat_poller::scheduler::{Scheduler, SchedulerOptions};
use chat_poller::source::ApiClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Poll chat streams and report new messages")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only watch these streams (ids or display names); overrides source.streams
    #[arg(short = 'u', long, num_args = 1..)]
    streams: Vec<String>,

    /// Seconds between polling cycles; overrides app.poll_interval_secs
    #[arg(short = 'i', long)]
    interval: Option<u64>,

    /// Discard saved checkpoints before starting
    #[arg(long)]
    reset: bool,

    /// Run a single cycle, flush checkpoints and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    if !args.streams.is_empty() {
        cfg.source.streams = args.streams.clone();
    }
    if let Some(secs) = args.interval {
        if secs == 0 {
            anyhow::bail!("--interval must be > 0");
        }
        cfg.app.poll_interval_secs = secs;
    }
    cfg.ensure_dirs()?;

    let state_path = cfg.state_path();
    if args.reset && checkpoint::reset(&state_path).await? {
        info!(path = %state_path.display(), "reset saved state");
    }

    let client = Arc::new(ApiClient::from_config(&cfg.source)?);
    let notifier = Notifier::from_config(&cfg)?;
    let store = CheckpointStore::open(&state_path).await;
    let options = SchedulerOptions::from_config(&cfg);

    let mut scheduler = Scheduler::new(client.clone(), client, notifier, store, options);

    if args.once {
        let report = scheduler.run_cycle().await;
        info!(?report, "single cycle finished");
        return Ok(());
    }

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("stopping poller");
                stop.cancel();
            }
            Err(err) => error!(?err, "failed to listen for ctrl-c"),
        }
    });

    info!(
        interval_secs = cfg.app.poll_interval_secs,
        state = %state_path.display(),
        "starting chat poller; press Ctrl+C to stop"
    );
    scheduler.run().await;
    Ok(())
}
