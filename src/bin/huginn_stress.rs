//! huginn-stress: hammer a cache with concurrent readers.
//!
//! Spawns `--readers` tasks per round that all read the same small key set
//! against a loader with artificial latency, then reports how many reads
//! each status answered and how many loader calls actually happened. With
//! single-flight working, loader calls stay close to `keys × refreshes`
//! no matter how many readers there are.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::info;

use huginn::{AsyncCache, Config, HuginnError};

/// Huginn stress driver.
#[derive(Parser)]
#[command(name = "huginn-stress")]
#[command(version = huginn::PKG_VERSION)]
#[command(about = "Measure upstream load behind a huginn cache under concurrent reads")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of distinct keys.
    #[arg(long, default_value_t = 8)]
    keys: usize,

    /// Concurrent readers per round.
    #[arg(long, default_value_t = 64)]
    readers: usize,

    /// Number of rounds.
    #[arg(long, default_value_t = 20)]
    rounds: usize,

    /// Simulated loader latency in milliseconds.
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Fail every Nth loader call (0 = never).
    #[arg(long, default_value_t = 0)]
    fail_every: u64,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    reads: usize,
    loader_calls: u64,
    loader_failures: u64,
    statuses: BTreeMap<String, usize>,
    elapsed_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let failures = Arc::new(AtomicU64::new(0));
    let cache: AsyncCache<String> = AsyncCache::builder()
        .config(config.clone())
        .on_error({
            let failures = Arc::clone(&failures);
            move |_: &str, _: &HuginnError| {
                failures.fetch_add(1, Ordering::Relaxed);
            }
        })
        .build()?;

    let prefix: String = "STRESS".chars().cycle().take(config.prefix_len).collect();
    let calls = Arc::new(AtomicU64::new(0));
    {
        let calls = Arc::clone(&calls);
        let latency = Duration::from_millis(args.latency_ms);
        let fail_every = args.fail_every;
        cache.loaders().register_fn(prefix.clone(), move |key| {
            let n = calls.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                tokio::time::sleep(latency).await;
                if fail_every > 0 && n % fail_every == 0 {
                    return Err(HuginnError::upstream(format!("synthetic failure #{n}")));
                }
                Ok(format!("{key}@{n}"))
            }
        })?;
    }

    info!(
        keys = args.keys,
        readers = args.readers,
        rounds = args.rounds,
        "starting stress run"
    );

    let keys: Vec<String> = (0..args.keys.max(1))
        .map(|i| format!("{prefix}_{i}"))
        .collect();
    let started = Instant::now();
    let mut statuses: BTreeMap<String, usize> = BTreeMap::new();
    let mut reads = 0;

    for _ in 0..args.rounds {
        let tasks = (0..args.readers).map(|i| {
            let cache = cache.clone();
            let key = keys[i % keys.len()].clone();
            tokio::spawn(async move { cache.get(&key).status })
        });
        for status in join_all(tasks).await {
            *statuses.entry(status?.to_string()).or_default() += 1;
            reads += 1;
        }
        tokio::time::sleep(Duration::from_millis(args.latency_ms / 2 + 1)).await;
    }

    let report = Report {
        reads,
        loader_calls: calls.load(Ordering::Relaxed),
        loader_failures: failures.load(Ordering::Relaxed),
        statuses,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} reads, {} loader calls ({} failed) in {}ms",
            report.reads, report.loader_calls, report.loader_failures, report.elapsed_ms
        );
        for (status, count) in &report.statuses {
            println!("  {status:<12} {count}");
        }
    }

    cache.shutdown();
    Ok(())
}
