//! Bucket array sizing

use crate::error::{Error, Result};

/// Largest power of two representable as a positive `i64`
const MAX_POWER_OF_TWO: i64 = 1 << 62;

/// Round a requested capacity up to the next power of two.
///
/// Zero rounds up to `1`. Values above `2^62` saturate at `i64::MAX`.
///
/// # Errors
/// * `Error::NegativeCapacity` - `n` is negative
pub fn round_up_to_power_of_two(n: i64) -> Result<i64> {
    if n < 0 {
        return Err(Error::NegativeCapacity(n));
    }
    if n > MAX_POWER_OF_TWO {
        return Ok(i64::MAX);
    }

    // n <= 2^62 here, so the shift cannot overflow
    Ok((n as u64).next_power_of_two() as i64)
}
