//! Error types for stampcache

use thiserror::Error;

/// Boxed error produced by a fallible generator
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for stampcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache construction and reads
#[derive(Debug, Error)]
pub enum Error {
    /// Requested capacity was negative
    #[error("Negative capacity: {0}")]
    NegativeCapacity(i64),

    /// Requested capacity was zero
    #[error("Capacity must be greater than 0")]
    ZeroCapacity,

    /// Requested capacity exceeds the supported maximum
    #[error("Capacity too large: {0} entries (max {max})", max = crate::MAX_CAPACITY)]
    CapacityTooLarge(i64),

    /// Implementation selector was not recognized
    #[error("Unknown cache kind {0:?}, try 'baseline' or 'custom'")]
    UnknownKind(String),

    /// The generator failed to produce a value
    #[error("Generator failed: {0}")]
    Generator(#[source] BoxError),
}

impl Error {
    /// Whether this error was raised while validating configuration
    pub fn is_config(&self) -> bool {
        !matches!(self, Error::Generator(_))
    }
}

/// Error returned when the engine's internal structure is inconsistent.
///
/// Produced by [`CustomCache::check_invariants`](crate::CustomCache::check_invariants).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invariant violated: {0}")]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    pub fn message(&self) -> &str {
        &self.0
    }
}
