use clap::Parser;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, NormalError};
use serde::Serialize;
use sparsebits::{
    BitSet, BitSetParams, Metrics, MetricsSnapshot, config::ConfigError, statistics::TracingSink,
};
use std::{
    error::Error,
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Instant,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Concurrent write/read workload against a sparse bit set
#[derive(Parser, Debug)]
#[command(name = "sparsebits")]
#[command(about = "Drives a concurrent set/get workload against a sparse bit set", long_about = None)]
struct Args {
    /// JSON file holding the bit set parameters; --size and --log2-segment-size override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logical capacity of the bit set
    #[arg(short, long)]
    size: Option<i64>,

    /// Bits per segment, as a power of two
    #[arg(short, long)]
    log2_segment_size: Option<i32>,

    /// Number of threads to use (comma-separated list, e.g., "1,2,4,8")
    #[arg(short, long, value_delimiter = ',', default_value = "1")]
    threads: Vec<usize>,

    /// Number of indices written (and read back) per job
    #[arg(long, default_value_t = 1_000_000)]
    ops: usize,

    /// Standard deviation of the written indices as a fraction of the size; 0 writes uniformly
    #[arg(long, default_value_t = 0.0)]
    spread: f64,

    /// Seed of the index generators
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print one JSON report per job instead of text
    #[arg(long)]
    json: bool,

    /// Emit a trace event for every counter increment
    #[arg(long)]
    trace_counters: bool,
}

/// Where written indices come from.
enum IndexSource {
    Uniform { size: u64 },
    Clustered { normal: Normal<f64>, size: u64 },
}

impl IndexSource {
    fn new(size: u64, spread: f64) -> Result<Self, NormalError> {
        if spread <= 0.0 {
            return Ok(IndexSource::Uniform { size });
        }
        let normal = Normal::new(size as f64 / 2.0, spread * size as f64)?;
        Ok(IndexSource::Clustered { normal, size })
    }

    fn sample(&self, rng: &mut StdRng) -> u64 {
        match self {
            IndexSource::Uniform { size } => rng.random_range(0..*size),
            IndexSource::Clustered { normal, size } => {
                (normal.sample(rng).max(0.0) as u64).min(size - 1)
            }
        }
    }
}

#[derive(Serialize)]
struct JobReport {
    threads: usize,
    ops: usize,
    seconds: f64,
    ops_per_second: f64,
    cardinality: u64,
    materialized_segments: usize,
    lost_writes: usize,
    metrics: MetricsSnapshot,
}

fn run_job(
    bits: Arc<BitSet>,
    source: Arc<IndexSource>,
    num_threads: usize,
    ops: usize,
    seed: u64,
) -> JobReport {
    let start_time = Instant::now();

    let batch_size = 4096;
    let next_batch = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let bits = Arc::clone(&bits);
            let source = Arc::clone(&source);
            let next_batch = Arc::clone(&next_batch);

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed ^ thread_id as u64);
                let mut lost_writes: usize = 0;

                loop {
                    // Atomically grab the next batch of work
                    let batch_start = next_batch.fetch_add(batch_size, Ordering::Relaxed);
                    if batch_start >= ops {
                        break;
                    }
                    let batch_end = std::cmp::min(batch_start + batch_size, ops);

                    for _ in batch_start..batch_end {
                        let index = source.sample(&mut rng);
                        bits.set(index, true);
                        if !bits.get(index) {
                            lost_writes += 1;
                        }
                    }
                }

                lost_writes
            })
        })
        .collect();

    let lost_writes: usize = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .sum();

    let elapsed = start_time.elapsed();
    JobReport {
        threads: num_threads,
        ops,
        seconds: elapsed.as_secs_f64(),
        ops_per_second: ops as f64 / elapsed.as_secs_f64(),
        cardinality: bits.cardinality(),
        materialized_segments: bits.materialized_segments(),
        lost_writes,
        metrics: bits.metrics(),
    }
}

fn resolve_params(args: &Args) -> Result<BitSetParams, ConfigError> {
    let mut params = match &args.config {
        Some(path) => BitSetParams::load(path)?,
        None => BitSetParams::default(),
    };
    if let Some(size) = args.size {
        params.size = size;
    }
    if let Some(log2_segment_size) = args.log2_segment_size {
        params.log2_segment_size = log2_segment_size;
    }
    params.layout()?;
    Ok(params)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let params = resolve_params(&args)?;
    let layout = params.layout()?;
    if layout.size == 0 {
        return Err("cannot run a workload against an empty bit set".into());
    }
    let source = Arc::new(IndexSource::new(layout.size, args.spread)?);

    info!(
        size = layout.size,
        log2_segment_size = layout.log2_segment_size,
        segments = layout.segment_count,
        threads = ?args.threads,
        ops = args.ops,
        "starting workload sweep"
    );

    for &num_threads in &args.threads {
        if num_threads == 0 {
            warn!("skipping job with zero threads");
            continue;
        }
        let metrics = if args.trace_counters {
            Metrics::with_sink(Arc::new(TracingSink))
        } else {
            Metrics::new()
        };
        // fresh bit set per job so every run starts from an empty structure
        let bits = Arc::new(BitSet::with_metrics(&params, Arc::new(metrics))?);

        let report = run_job(bits, Arc::clone(&source), num_threads, args.ops, args.seed);
        if report.lost_writes > 0 {
            warn!(lost = report.lost_writes, "writes were not readable after set");
        }

        if args.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            println!("\n==========");
            println!("threads={}, ops={}", report.threads, report.ops);
            println!("==========");
            println!(
                "Completed {} writes in {:.2}s ({:.2} ops/s)",
                report.ops, report.seconds, report.ops_per_second
            );
            println!(
                "  {} bits set across {} materialized segments",
                report.cardinality, report.materialized_segments
            );
            println!("  {}", report.metrics);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
