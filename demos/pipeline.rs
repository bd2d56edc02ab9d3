//! End-to-end demo: producers record deltas while an aggregator folds them
//! into an in-memory store.
//!
//! Run with:
//! ```bash
//! cargo run --example pipeline --features demo -- --help
//! RUST_LOG=accumulatori=debug cargo run --example pipeline --features demo -- --chaos-seed 7
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use accumulatori::buffered::BufferedCounter;
use accumulatori::cache::MemoryCache;
use accumulatori::config::BufferConfig;
use accumulatori::observers::json::JsonObserver;
use accumulatori::observers::prometheus::PrometheusObserver;
use accumulatori::queue::{FaultConfig, MemoryQueue};
use accumulatori::snapshot::AggregateSnapshot;
use accumulatori::{CounterError, DiffMap};
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

const NAMESPACE: &str = "page_views";

/// Output format for the statistics.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// JSON format
    Json,
    /// Prometheus exposition format
    Prometheus,
}

/// Buffered counter pipeline demo.
///
/// Spawns producer threads that record page views, aggregates them
/// periodically, and prints the persisted totals and the counter statistics.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output format for statistics
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Number of producer threads
    #[arg(short, long, default_value = "4")]
    producers: usize,

    /// Deltas recorded per producer
    #[arg(short, long, default_value = "10000")]
    records: usize,

    /// Number of distinct pages
    #[arg(short, long, default_value = "8")]
    keys: usize,

    /// Aggregation interval in milliseconds
    #[arg(short, long, default_value = "50")]
    interval: u64,

    /// Inject queue failures from this seed
    #[arg(long)]
    chaos_seed: Option<u64>,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,

    /// Prometheus instance label
    #[arg(long)]
    instance: Option<String>,
}

type Store = Arc<Mutex<BTreeMap<String, i64>>>;

fn persist_into(store: &Store) -> impl FnOnce(&str, DiffMap) -> Result<(), CounterError> + '_ {
    move |namespace, diffs| {
        let snapshot = AggregateSnapshot::new(namespace, diffs);
        tracing::info!(keys = snapshot.diffs.len(), net = snapshot.net(), "persisting aggregate");
        let mut store = store.lock();
        for (key, diff) in snapshot.diffs {
            *store.entry(key).or_insert(0) += diff;
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut queue = MemoryQueue::new();
    let mut config = BufferConfig::from_env();
    if let Some(seed) = args.chaos_seed {
        queue = queue.with_faults(FaultConfig::high_chaos(), seed);
        // batches of failed passes come back quickly
        config = config.with_aggregate_lease(Duration::from_secs(1));
    }
    let counter = Arc::new(BufferedCounter::with_config(
        queue,
        MemoryCache::new(),
        config,
    )?);
    let store: Store = Arc::new(Mutex::new(BTreeMap::new()));
    let done = Arc::new(AtomicBool::new(false));

    let aggregator = {
        let counter = Arc::clone(&counter);
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        let interval = Duration::from_millis(args.interval);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                if let Err(err) = counter.aggregate(NAMESPACE, persist_into(&store)) {
                    tracing::warn!(error = %err, "aggregation failed, retrying next tick");
                }
                thread::sleep(interval);
            }
        })
    };

    let producers: Vec<_> = (0..args.producers)
        .map(|p| {
            let counter = Arc::clone(&counter);
            let (records, keys) = (args.records, args.keys.max(1));
            thread::spawn(move || {
                let mut recorded = 0i64;
                for i in 0..records {
                    let page = format!("/page/{}", (p + i) % keys);
                    if counter.record_delta(NAMESPACE, &page, 1).is_ok() {
                        recorded += 1;
                    }
                }
                recorded
            })
        })
        .collect();

    let mut recorded = 0;
    for producer in producers {
        recorded += producer.join().map_err(|_| "producer panicked")?;
    }
    done.store(true, Ordering::Release);
    aggregator.join().map_err(|_| "aggregator panicked")?;

    // failed passes leave their batches leased until the lease runs out
    counter.queue().heal();
    while !counter.queue().is_empty(NAMESPACE) {
        if counter.queue().visible_len(NAMESPACE) == 0 {
            tracing::info!(
                leased = counter.queue().len(NAMESPACE),
                "waiting for leases of failed passes"
            );
            thread::sleep(Duration::from_millis(250));
            continue;
        }
        if let Err(err) = counter.aggregate(NAMESPACE, persist_into(&store)) {
            tracing::warn!(error = %err, "final aggregation failed");
        }
    }

    let persisted: i64 = store.lock().values().sum();
    println!("recorded {recorded} deltas, persisted {persisted}");
    for (page, total) in store.lock().iter() {
        println!("  {page}: {total}");
    }
    println!();

    let observables = counter.stats().observables();
    let output = match args.format {
        OutputFormat::Json => JsonObserver::new()
            .pretty(args.pretty)
            .wrap_in_snapshot(true)
            .include_timestamp(true)
            .to_json(observables.into_iter())?,
        OutputFormat::Prometheus => {
            let mut observer = PrometheusObserver::new().with_namespace("accumulatori");
            if let Some(ref instance) = args.instance {
                observer = observer.with_const_label("instance", instance);
            }
            observer.render(observables.into_iter())?
        }
    };
    println!("{output}");

    Ok(())
}
