//! Cache contract and factory

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::baseline::BaselineCache;
use crate::custom::CustomCache;
use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::stats::CacheStats;

/// Operations shared by every cache implementation
pub trait Cache<K, V> {
    /// Return the value for `key`, generating and caching it if absent
    fn read(&self, key: &K) -> Result<V>;

    /// Look up `key` without generating it. Diagnostic use only.
    fn get(&self, key: &K) -> Option<V>;

    /// Number of live entries
    fn usage(&self) -> usize;

    /// Maximum number of live entries
    fn capacity(&self) -> usize;

    /// Eviction order
    fn policy(&self) -> Policy;

    /// Hit/miss counters
    fn stats(&self) -> &CacheStats;
}

/// Which entry is evicted once the cache is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Oldest inserted entry goes first; hits never reorder
    Fifo,
    /// Least recently read entry goes first
    Lru,
}

impl Policy {
    /// `true` selects LRU, `false` FIFO
    pub fn from_lru(lru: bool) -> Self {
        if lru {
            Policy::Lru
        } else {
            Policy::Fifo
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Fifo => write!(f, "FIFO"),
            Policy::Lru => write!(f, "LRU"),
        }
    }
}

/// Cache implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Single-threaded reference implementation
    #[serde(alias = "jdk")]
    Baseline,
    /// Concurrent engine
    Custom,
}

impl FromStr for CacheKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "baseline" | "jdk" => Ok(CacheKind::Baseline),
            "custom" => Ok(CacheKind::Custom),
            _ => Err(Error::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Baseline => write!(f, "baseline"),
            CacheKind::Custom => write!(f, "custom"),
        }
    }
}

/// Construction parameters for [`build`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Implementation to construct
    pub kind: CacheKind,
    /// Requested capacity; validated at construction
    pub capacity: i64,
    /// Eviction order
    #[serde(default = "default_policy")]
    pub policy: Policy,
}

fn default_policy() -> Policy {
    Policy::Fifo
}

/// Build a cache from its implementation selector.
///
/// # Arguments
/// * `kind` - Implementation to construct
/// * `generator` - Computes values for missing keys
/// * `capacity` - Maximum number of live entries
/// * `lru` - LRU when `true`, FIFO otherwise
///
/// # Returns
/// * `Result<Box<dyn Cache<K, V>>>` - Configuration errors are reported here
pub fn make<K, V>(
    kind: CacheKind,
    generator: Generator<K, V>,
    capacity: i64,
    lru: bool,
) -> Result<Box<dyn Cache<K, V>>>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    let policy = Policy::from_lru(lru);
    info!(%kind, capacity, %policy, "building cache");

    Ok(match kind {
        CacheKind::Baseline => Box::new(BaselineCache::new(generator, capacity, policy)?),
        CacheKind::Custom => Box::new(CustomCache::new(generator, capacity, policy)?),
    })
}

/// Build a cache from a [`CacheConfig`]
pub fn build<K, V>(config: &CacheConfig, generator: Generator<K, V>) -> Result<Box<dyn Cache<K, V>>>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    make(
        config.kind,
        generator,
        config.capacity,
        config.policy == Policy::Lru,
    )
}
