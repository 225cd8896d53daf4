//! Value generators backing a cache

use std::fmt;

use crate::error::{BoxError, Error, Result};

type GenerateFn<K, V> = dyn Fn(&K) -> std::result::Result<V, BoxError> + Send + Sync;

/// Computes the value for a missing key.
///
/// Generators must be deterministic: a key evicted and read again is
/// regenerated, and callers expect the same value back.
pub struct Generator<K, V> {
    f: Box<GenerateFn<K, V>>,
}

impl<K, V> Generator<K, V> {
    /// Wrap an infallible function
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Self {
            f: Box::new(move |key| Ok(f(key))),
        }
    }

    /// Wrap a function whose failures propagate to `read` callers
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn(&K) -> std::result::Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            f: Box::new(move |key| f(key).map_err(Into::into)),
        }
    }

    /// Produce the value for `key`
    pub fn generate(&self, key: &K) -> Result<V> {
        (self.f)(key).map_err(Error::Generator)
    }
}

impl<K, V> fmt::Debug for Generator<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infallible() {
        let generator = Generator::new(|k: &u32| k.to_string());
        assert_eq!(generator.generate(&7).unwrap(), "7");
    }

    #[test]
    fn test_fallible() {
        let generator = Generator::fallible(|k: &u32| {
            if *k == 0 {
                Err("zero has no value")
            } else {
                Ok(k * 2)
            }
        });

        assert_eq!(generator.generate(&4).unwrap(), 8);
        let err = generator.generate(&0).unwrap_err();
        assert!(matches!(err, Error::Generator(_)));
        assert_eq!(err.to_string(), "Generator failed: zero has no value");
    }
}
