//! Decoder configuration and resource guards.
//!
//! Limits are checked before allocating, so a codestream claiming absurd
//! dimensions fails with [`J2kError::ResourceLimitExceeded`] instead of
//! exhausting memory.

use crate::error::J2kError;

/// Default pixel guard, in megapixels.
pub const DEFAULT_MAX_MEGAPIXELS: u64 = 100;
/// Default cumulative allocation guard: 512 MiB.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// Options for one decode call.
///
/// ```
/// use jpx_rs::DecodeOptions;
///
/// let options = DecodeOptions::default()
///     .with_strict(false)
///     .with_max_megapixels(16);
/// assert!(!options.strict);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Any anomaly is fatal. When cleared, recoverable corruption stops the
    /// decode and the partial image is returned with the error attached.
    /// Default: true
    pub strict: bool,
    /// Maximum image area in megapixels.
    /// Default: 100
    pub max_megapixels: u64,
    /// Maximum cumulative bytes of large working allocations.
    /// Default: 512 MiB
    pub max_memory_bytes: u64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            strict: true,
            max_megapixels: DEFAULT_MAX_MEGAPIXELS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

impl DecodeOptions {
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_max_megapixels(mut self, megapixels: u64) -> Self {
        self.max_megapixels = megapixels;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Rejects images larger than `max_megapixels`.
    pub fn check_pixel_count(&self, width: u32, height: u32) -> Result<(), J2kError> {
        let pixels = width as u64 * height as u64;
        let limit = self.max_megapixels.saturating_mul(1_000_000);
        if pixels > limit {
            return Err(J2kError::ResourceLimitExceeded {
                what: "pixels",
                requested: pixels,
                limit,
            });
        }
        Ok(())
    }
}

/// Running total of the large allocations made by one decode.
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    limit: u64,
    used: u64,
}

impl MemoryBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Accounts for `bytes` more, failing when the total would pass the limit.
    pub fn reserve(&mut self, bytes: u64, what: &'static str) -> Result<(), J2kError> {
        let requested = self.used.saturating_add(bytes);
        if requested > self.limit {
            return Err(J2kError::ResourceLimitExceeded {
                what,
                requested,
                limit: self.limit,
            });
        }
        self.used = requested;
        Ok(())
    }

    /// Returns bytes of a buffer that has been dropped.
    pub fn release(&mut self, bytes: u64) {
        self.used = self.used.saturating_sub(bytes);
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = DecodeOptions::default();
        assert!(options.strict);
        assert_eq!(options.max_megapixels, 100);
        assert_eq!(options.max_memory_bytes, 536_870_912);
    }

    #[test]
    fn test_pixel_guard() {
        let options = DecodeOptions::default().with_max_megapixels(1);
        assert!(options.check_pixel_count(1000, 1000).is_ok());
        assert_eq!(
            options.check_pixel_count(1001, 1000),
            Err(J2kError::ResourceLimitExceeded {
                what: "pixels",
                requested: 1_001_000,
                limit: 1_000_000,
            })
        );
    }

    #[test]
    fn test_budget_is_cumulative() {
        let mut budget = MemoryBudget::new(100);
        budget.reserve(60, "code-block state").unwrap();
        let err = budget.reserve(50, "tile plane").unwrap_err();
        assert_eq!(
            err,
            J2kError::ResourceLimitExceeded {
                what: "tile plane",
                requested: 110,
                limit: 100,
            }
        );
        assert_eq!(budget.used(), 60);
        budget.release(60);
        budget.reserve(100, "tile plane").unwrap();
        assert_eq!(budget.used(), 100);
    }
}
