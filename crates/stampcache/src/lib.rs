//! # stampcache
//!
//! Bounded key/value cache that computes missing values on demand and
//! evicts in FIFO or LRU order.
//!
//! ## Architecture
//! - **Arena**: nodes addressed by index, each in a bucket chain and the ordering list
//! - **Buckets**: power-of-two array indexed by an AHash mask
//! - **Locking**: seqlock-validated optimistic reads, then a parking_lot `RwLock`
//! - **Baseline**: single-threaded ordered map used as a reference
//!
//! ```
//! use stampcache::{make, Cache, CacheKind, Generator};
//!
//! let cache = make(CacheKind::Custom, Generator::new(|k: &u32| k.to_string()), 3, false)?;
//! for key in [1, 2, 1, 3, 4] {
//!     cache.read(&key)?;
//! }
//! assert_eq!(cache.usage(), 3);
//! assert_eq!(cache.get(&1), None);
//! # Ok::<(), stampcache::Error>(())
//! ```

#![warn(missing_docs)]

mod baseline;
mod cache;
mod custom;
mod error;
mod generator;
mod node;
mod seqlock;
mod sizing;
mod stats;

pub use baseline::BaselineCache;
pub use cache::{build, make, Cache, CacheConfig, CacheKind, Policy};
pub use custom::{CustomCache, MAX_CAPACITY};
pub use error::{BoxError, Error, InvariantError, Result};
pub use generator::Generator;
pub use sizing::round_up_to_power_of_two;
pub use stats::CacheStats;
