//! Image size figures and unit conversion.
//!
//! Registries report byte counts; operators configure limits in megabytes
//! (1 MB = 1024 × 1024 bytes), and admission messages print megabytes with
//! two decimals.

use serde::{Deserialize, Serialize};

/// Bytes per configured megabyte.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Factor applied to a compressed size when no uncompressed figure is known.
pub const UNCOMPRESSED_ESTIMATE_FACTOR: f64 = 1.7;

/// Size of an image as reported by a size resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Reported size in bytes.
    pub size_bytes: u64,

    /// Whether `size_bytes` can be compared against a limit as-is.
    ///
    /// When false, the figure is a compressed size and callers estimate the
    /// uncompressed size with [`UNCOMPRESSED_ESTIMATE_FACTOR`].
    pub accurate: bool,
}

impl ImageSize {
    /// Creates a size that is compared against limits directly.
    #[must_use]
    pub const fn accurate(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            accurate: true,
        }
    }

    /// Creates a compressed size that needs the estimate factor applied.
    #[must_use]
    pub const fn estimated(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            accurate: false,
        }
    }

    /// Returns the size to compare against a namespace limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_core::ImageSize;
    ///
    /// assert_eq!(ImageSize::accurate(100).effective_bytes(), 100);
    /// assert_eq!(ImageSize::estimated(100).effective_bytes(), 170);
    /// ```
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn effective_bytes(&self) -> u64 {
        if self.accurate {
            self.size_bytes
        } else {
            (self.size_bytes as f64 * UNCOMPRESSED_ESTIMATE_FACTOR).round() as u64
        }
    }
}

/// Converts a configured megabyte limit into bytes.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn mb_to_bytes(mb: f64) -> u64 {
    if mb.is_sign_negative() || mb.is_nan() {
        return 0;
    }
    (mb * BYTES_PER_MB as f64).round() as u64
}

/// Converts bytes into megabytes.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}

/// Formats a byte count as megabytes with two decimals (`97.00 MB`).
#[must_use]
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes_to_mb(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mb_round_trip() {
        assert_eq!(mb_to_bytes(500.0), 500 * BYTES_PER_MB);
        assert!((bytes_to_mb(97 * BYTES_PER_MB) - 97.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fractional_limit() {
        assert_eq!(mb_to_bytes(0.5), BYTES_PER_MB / 2);
    }

    #[test]
    fn test_negative_limit_clamps_to_zero() {
        assert_eq!(mb_to_bytes(-1.0), 0);
    }

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(97 * BYTES_PER_MB), "97.00 MB");
        assert_eq!(format_mb(BYTES_PER_MB + BYTES_PER_MB / 4), "1.25 MB");
    }

    #[test]
    fn test_effective_bytes_applies_factor_only_when_estimated() {
        let compressed = 10 * BYTES_PER_MB;
        assert_eq!(ImageSize::accurate(compressed).effective_bytes(), compressed);
        assert_eq!(ImageSize::estimated(compressed).effective_bytes(), 17 * BYTES_PER_MB);
    }
}
