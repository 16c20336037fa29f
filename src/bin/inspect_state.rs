use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use chat_poller::checkpoint::CheckpointStore;
use chat_poller::config;

#[derive(Parser, Debug)]
#[command(author, version, about = "Show or edit the poller's saved checkpoints")]
struct Args {
    /// Path to YAML config (used to locate the state file)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Read this state file instead of the configured one
    #[arg(long)]
    state: Option<PathBuf>,

    /// Remove the checkpoint of this stream so it bootstraps again.
    /// Stop the poller first: a running poller rewrites the file from memory
    /// on every cycle and would restore the entry.
    #[arg(long)]
    forget: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let path = match args.state {
        Some(path) => path,
        None => config::load(Some(&args.config))
            .context("failed to load config; pass --state to skip it")?
            .state_path(),
    };

    let mut store = CheckpointStore::open(&path).await;

    if let Some(stream_id) = args.forget.as_deref() {
        match store.remove(stream_id) {
            Some(cp) => {
                store.save().await?;
                println!("Forgot stream {} (was at id {})", stream_id, cp.last_seen_id);
                println!("Note: takes effect only if no poller is running on this state file");
            }
            None => println!("No checkpoint for stream {}", stream_id),
        }
        return Ok(());
    }

    println!("State file: {}", path.display());
    println!("Streams: {}", store.len());
    for (stream_id, cp) in store.entries() {
        println!(
            "  {} -> {{ last_seen_id: {}, last_seen_at: {}, updated_at: {} }}",
            stream_id,
            cp.last_seen_id,
            cp.last_seen_at.format("%Y-%m-%d %H:%M:%S"),
            cp.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}
