//! fastprefetch - warm image URLs through named prefetch queues
//!
//! Loads prefetch settings, pushes the given URLs through the queue
//! coordinator, waits for every queue to drain and prints per-queue stats.

use anyhow::{Context, Result};
use clap::Parser;
use fastprefetch::{
    EventLog, HttpFetcher, PrefetchContext, PrefetchCoordinator, PrefetchError, PrefetchSettings,
    QueueSettings, QueueStats, SubmitOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// URLs to prefetch
    urls: Vec<String>,

    /// Queue to prefetch into (defaults to the primary queue)
    #[arg(long)]
    queue: Option<String>,

    /// Concurrency bound for the target queue
    #[arg(long)]
    concurrency: Option<usize>,

    /// URLs to prefetch through the immediate queue
    #[arg(long)]
    immediate: Vec<String>,

    /// Settings file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to record queue events in
    #[arg(long)]
    event_log: Option<PathBuf>,

    /// Reject responses that are not a known image format
    #[arg(long)]
    verify_images: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let settings = load_settings(&args)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, settings))
}

fn load_settings(args: &Args) -> Result<PrefetchSettings> {
    let mut settings = match &args.config {
        Some(path) => PrefetchSettings::load(path)?,
        None => {
            let path = PrefetchSettings::default_path();
            if path.exists() {
                PrefetchSettings::load(&path)?
            } else {
                PrefetchSettings::default()
            }
        }
    };

    if args.verify_images {
        settings.verify_images = true;
    }
    if let (Some(queue), Some(concurrency)) = (&args.queue, args.concurrency) {
        settings.queues.retain(|q| &q.name != queue);
        settings.queues.push(QueueSettings::new(queue.clone(), concurrency));
    } else if let Some(concurrency) = args.concurrency {
        settings.default_concurrency = concurrency;
    }

    Ok(settings.sanitized())
}

async fn run(args: Args, settings: PrefetchSettings) -> Result<()> {
    let fetcher = HttpFetcher::new(settings.fetch_config()).context("Failed to build HTTP client")?;
    let context = Arc::new(PrefetchContext::new(settings, Arc::new(fetcher))?);
    let coordinator = PrefetchCoordinator::new(Arc::clone(&context));

    let recorder = match &args.event_log {
        Some(dir) => {
            let log = EventLog::new(dir).await?;
            println!("Recording events to {}", log.path().display());
            Some(log.record(coordinator.subscribe()))
        }
        None => None,
    };

    for url in &args.immediate {
        submit(url, coordinator.prefetch_immediate(url));
    }
    for url in &args.urls {
        submit(url, coordinator.prefetch(url, args.queue.as_deref()));
    }

    // wait for the work to finish before collecting stats; shutdown removes the queues
    for name in context.registry().names() {
        if let Some(queue) = context.registry().get(&name) {
            queue.drain().await;
        }
    }
    context.immediate_queue().drain().await;

    let mut all_stats = coordinator.all_stats();
    all_stats.push(coordinator.immediate_stats());
    println!(
        "{:<16} {:>6} {:>9} {:>6} {:>9} {:>10}",
        "queue", "limit", "completed", "failed", "cancelled", "suppressed"
    );
    for stats in &all_stats {
        print_stats(stats);
    }

    context.shutdown().await?;

    // dropping the context closes the event channel and ends the recorder
    drop(coordinator);
    drop(context);
    if let Some(handle) = recorder {
        handle.await.context("Event recorder failed")?;
    }

    Ok(())
}

fn submit(url: &str, result: Result<SubmitOutcome, PrefetchError>) {
    match result {
        Ok(SubmitOutcome::DuplicateSuppressed) => println!("~ {} (duplicate)", url),
        Ok(_) => {}
        Err(e) => warn!("Skipping {}: {}", url, e),
    }
}

fn print_stats(stats: &QueueStats) {
    println!(
        "{:<16} {:>6} {:>9} {:>6} {:>9} {:>10}",
        stats.name, stats.max_concurrency, stats.completed, stats.failed, stats.cancelled, stats.suppressed
    );
}
