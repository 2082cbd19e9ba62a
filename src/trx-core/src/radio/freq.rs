// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::{Deserialize, Serialize};

/// Tunable frequency range in Hz (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub low_hz: i64,
    pub high_hz: i64,
}

impl FrequencyRange {
    #[must_use]
    pub fn new(low_hz: i64, high_hz: i64) -> Self {
        Self { low_hz, high_hz }
    }

    /// Midpoint frequency of the range in Hz.
    #[must_use]
    pub fn center_hz(&self) -> i64 {
        self.low_hz + (self.high_hz - self.low_hz) / 2
    }

    #[must_use]
    pub fn contains(&self, hz: i64) -> bool {
        hz >= self.low_hz && hz <= self.high_hz
    }

    #[must_use]
    pub fn span_hz(&self) -> i64 {
        self.high_hz - self.low_hz
    }
}

/// Format a frequency in Hz as MHz with five decimals (10 Hz resolution).
pub fn format_mhz(hz: f64) -> String {
    format!("{:.5}", hz / 1e6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_contains_inclusive() {
        let range = FrequencyRange::new(24_000_000, 1_766_000_000);
        assert!(range.contains(24_000_000));
        assert!(range.contains(1_766_000_000));
        assert!(!range.contains(23_999_999));
        assert_eq!(range.span_hz(), 1_742_000_000);
    }

    #[test]
    fn test_format_mhz() {
        assert_eq!(format_mhz(162_550_000.0), "162.55000");
        assert_eq!(format_mhz(-12_500.0), "-0.01250");
    }
}
