//! StampCheck - scenario harness for stampcache implementations

mod scenarios;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use stampcache::{CacheConfig, CacheKind, Policy};
use tracing::{error, info, warn};

use crate::scenarios::{Report, StressParams};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache implementation to exercise: custom | baseline (alias: jdk)
    #[arg(value_parser = parse_kind)]
    kind: CacheKind,

    /// Capacity for the randomized and concurrent scenarios
    #[arg(short, long, default_value_t = 16)]
    capacity: i64,

    /// Distinct keys read by the concurrent scenario
    #[arg(short, long, default_value_t = 127)]
    keys: u32,

    /// Reads per key in the concurrent scenario
    #[arg(short, long, default_value_t = 10_000)]
    iterations: u32,

    /// Worker threads (defaults to available parallelism)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Seed for the randomized scenario (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Reads performed by the randomized scenario
    #[arg(long, default_value_t = 10_000)]
    random_ops: usize,

    /// JSON cache config overriding kind/capacity/policy for the randomized scenario
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_kind(s: &str) -> stampcache::Result<CacheKind> {
    s.parse()
}

/// Load a [`CacheConfig`] from a JSON file
fn load_config(path: &Path) -> Result<CacheConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

fn run(args: &Args) -> Result<Vec<Report>> {
    let mut reports = Vec::new();

    for policy in [Policy::Fifo, Policy::Lru] {
        reports.push(scenarios::single_thread(args.kind, policy)?);
    }

    let seed = args.seed.unwrap_or_else(rand::random);
    info!("Randomized scenario seed: {}", seed);
    let configs = match &args.config {
        Some(path) => vec![load_config(path)?],
        None => [Policy::Fifo, Policy::Lru]
            .into_iter()
            .map(|policy| CacheConfig {
                kind: args.kind,
                capacity: args.capacity,
                policy,
            })
            .collect(),
    };
    for config in &configs {
        reports.push(scenarios::differential(config, seed, args.random_ops)?);
    }

    if args.kind == CacheKind::Custom {
        let threads = args.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        let params = StressParams {
            capacity: args.capacity,
            keys: args.keys,
            iterations: args.iterations,
            threads,
        };
        info!("Concurrent scenario on {} threads", threads);
        for policy in [Policy::Fifo, Policy::Lru] {
            reports.push(scenarios::concurrent(params, policy)?);
        }
    } else {
        warn!("Skipping concurrent scenario: {} cache is single-threaded", args.kind);
    }

    Ok(reports)
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting StampCheck v{}", env!("CARGO_PKG_VERSION"));
    info!("Implementation: {}", args.kind);

    let reports = run(&args)?;
    let mut failed = 0;
    for report in &reports {
        if report.passed() {
            info!("PASS {}", report.name);
        } else {
            failed += 1;
            error!("FAIL {}", report.name);
            for failure in &report.failures {
                error!("  {}", failure);
            }
        }
    }

    if failed > 0 {
        error!("{} of {} scenarios failed", failed, reports.len());
        std::process::exit(1);
    }
    info!("All {} scenarios passed", reports.len());
    Ok(())
}
