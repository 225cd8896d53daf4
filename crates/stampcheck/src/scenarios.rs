//! Scenarios driven by the harness
//!
//! Each scenario returns a [`Report`] instead of panicking so the harness
//! can run all of them and decide the exit status at the end.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stampcache::{
    build, make, BaselineCache, Cache, CacheConfig, CacheKind, CustomCache, Generator, Policy,
};
use tracing::{debug, info};

/// Outcome of one scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Scenario name, including implementation and policy
    pub name: String,
    /// Failed checks; empty when the scenario passed
    pub failures: Vec<String>,
}

impl Report {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: Vec::new(),
        }
    }

    fn check(&mut self, ok: bool, what: impl FnOnce() -> String) {
        if !ok {
            self.failures.push(what());
        }
    }

    /// Whether every check held
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

fn to_string() -> Generator<u32, String> {
    Generator::new(|k: &u32| k.to_string())
}

/// Reads `[1, 2, 1, 3, 4]` into a capacity-3 cache and checks which key
/// was evicted.
pub fn single_thread(kind: CacheKind, policy: Policy) -> Result<Report> {
    let lru = policy == Policy::Lru;
    let cache = make(kind, to_string(), 3, lru).context("Failed to build cache")?;
    let mut report = Report::new(format!("{kind} {policy} single thread"));

    for key in [1, 2, 1, 3, 4] {
        cache.read(&key)?;
    }

    let (evicted, kept) = if lru { (2, 1) } else { (1, 2) };
    report.check(cache.usage() == 3, || {
        format!("constant capacity: usage {} != 3", cache.usage())
    });
    report.check(cache.get(&evicted).is_none(), || {
        format!("stale entry {evicted} still cached")
    });
    report.check(cache.get(&kept) == Some(kept.to_string()), || {
        format!("entry {kept} missing or wrong")
    });
    report.check(cache.get(&3).as_deref() == Some("3"), || {
        "entry 3 missing or wrong".to_string()
    });

    Ok(report)
}

/// Random reads against `config`'s cache, checked step by step against a
/// fresh baseline with the same capacity and policy.
pub fn differential(config: &CacheConfig, seed: u64, ops: usize) -> Result<Report> {
    let cache = build(config, to_string()).context("Failed to build cache")?;
    let reference = BaselineCache::new(to_string(), config.capacity, config.policy)?;
    let mut report = Report::new(format!(
        "{} {} randomized (seed {seed})",
        config.kind, config.policy
    ));

    let mut rng = StdRng::seed_from_u64(seed);
    let key_space = (cache.capacity() as u32).saturating_mul(2).max(2);
    let hot = (cache.capacity() as u32 / 2).max(1);

    for step in 0..ops {
        // Bias towards a hot set so both hits and evictions happen
        let key = if rng.gen_bool(0.5) {
            rng.gen_range(0..hot)
        } else {
            rng.gen_range(0..key_space)
        };

        let got = cache.read(&key)?;
        let want = reference.read(&key)?;
        report.check(got == want, || {
            format!("step {step}: read({key}) = {got:?}, expected {want:?}")
        });
        report.check(cache.usage() == reference.usage(), || {
            format!(
                "step {step}: usage {} != reference {}",
                cache.usage(),
                reference.usage()
            )
        });
        report.check(cache.usage() <= cache.capacity(), || {
            format!("step {step}: usage {} above capacity", cache.usage())
        });
        if !report.passed() {
            break;
        }
    }

    for key in 0..key_space {
        let (got, want) = (cache.get(&key), reference.get(&key));
        report.check(got == want, || {
            format!("final get({key}) = {got:?}, expected {want:?}")
        });
    }
    debug!(
        hits = cache.stats().hits(),
        misses = cache.stats().misses(),
        evictions = cache.stats().evictions(),
        hit_ratio = cache.stats().hit_ratio(),
        "randomized run finished"
    );

    Ok(report)
}

/// Parameters of the concurrent stress scenario
#[derive(Debug, Clone, Copy)]
pub struct StressParams {
    /// Cache capacity
    pub capacity: i64,
    /// Keys `1..=keys` are read
    pub keys: u32,
    /// Reads per key
    pub iterations: u32,
    /// Worker threads
    pub threads: usize,
}

/// Every key read `iterations` times from `threads` workers; afterwards the
/// cache must be exactly full and every read must have returned its key's
/// string form.
pub fn concurrent(params: StressParams, policy: Policy) -> Result<Report> {
    let cache = CustomCache::new(to_string(), params.capacity, policy)?;
    let mut report = Report::new(format!("custom {policy} multi thread"));

    let next = AtomicUsize::new(1);
    let consistent = AtomicBool::new(true);
    let keys = params.keys as usize;

    thread::scope(|s| -> Result<()> {
        let workers: Vec<_> = (0..params.threads.max(1))
            .map(|_| {
                s.spawn(|| -> Result<()> {
                    loop {
                        let key = next.fetch_add(1, Ordering::Relaxed);
                        if key > keys {
                            return Ok(());
                        }
                        let key = key as u32;
                        let expected = key.to_string();
                        for _ in 0..params.iterations {
                            if cache.read(&key)? != expected {
                                consistent.store(false, Ordering::Relaxed);
                            }
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            match worker.join() {
                Ok(result) => result?,
                Err(_) => anyhow::bail!("worker thread panicked"),
            }
        }
        Ok(())
    })?;

    let expected_usage = (params.capacity as usize).min(keys);
    report.check(cache.usage() == expected_usage, || {
        format!("duplication check: usage {} != {expected_usage}", cache.usage())
    });
    report.check(consistent.load(Ordering::Relaxed), || {
        "consistency check: a read returned the wrong value".to_string()
    });
    if let Err(e) = cache.check_invariants() {
        report.failures.push(e.to_string());
    }
    info!(
        optimistic_hits = cache.stats().optimistic_hits(),
        hits = cache.stats().hits(),
        misses = cache.stats().misses(),
        hit_ratio = cache.stats().hit_ratio(),
        "stress run finished"
    );

    Ok(report)
}
