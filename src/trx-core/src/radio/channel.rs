// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::freq::format_mhz;

/// A slice of spectrum requested from a tuner: center frequency and bandwidth (Hz).
///
/// Channels sort by center frequency, then by bandwidth, so a sorted set of
/// channels walks the spectrum from low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTunerChannel")]
pub struct TunerChannel {
    frequency: i64,
    bandwidth: i64,
}

#[derive(Deserialize)]
struct RawTunerChannel {
    frequency: i64,
    bandwidth: i64,
}

impl TryFrom<RawTunerChannel> for TunerChannel {
    type Error = String;

    fn try_from(raw: RawTunerChannel) -> Result<Self, Self::Error> {
        TunerChannel::new(raw.frequency, raw.bandwidth)
    }
}

impl TunerChannel {
    /// Create a channel. Bandwidth must be positive.
    pub fn new(frequency: i64, bandwidth: i64) -> Result<Self, String> {
        if bandwidth <= 0 {
            return Err(format!(
                "tuner channel bandwidth must be > 0 (got {} Hz)",
                bandwidth
            ));
        }
        Ok(Self {
            frequency,
            bandwidth,
        })
    }

    #[must_use]
    pub fn frequency(&self) -> i64 {
        self.frequency
    }

    #[must_use]
    pub fn bandwidth(&self) -> i64 {
        self.bandwidth
    }

    /// Lowest frequency covered by the channel.
    #[must_use]
    pub fn min_frequency(&self) -> i64 {
        self.frequency - self.bandwidth / 2
    }

    /// Highest frequency covered by the channel.
    #[must_use]
    pub fn max_frequency(&self) -> i64 {
        self.frequency + self.bandwidth / 2
    }

    /// True when any part of the channel falls within `[min, max]` (inclusive).
    #[must_use]
    pub fn overlaps(&self, min: i64, max: i64) -> bool {
        self.min_frequency() <= max && self.max_frequency() >= min
    }

    #[must_use]
    pub fn overlaps_channel(&self, other: &TunerChannel) -> bool {
        self.overlaps(other.min_frequency(), other.max_frequency())
    }

    /// Copy of this channel moved to a new center frequency.
    #[must_use]
    pub fn with_frequency(&self, frequency: i64) -> Self {
        Self {
            frequency,
            bandwidth: self.bandwidth,
        }
    }
}

impl Ord for TunerChannel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.frequency
            .cmp(&other.frequency)
            .then(self.bandwidth.cmp(&other.bandwidth))
    }
}

impl PartialOrd for TunerChannel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TunerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} MHz ({} - {}) BW {} kHz",
            format_mhz(self.frequency as f64),
            format_mhz(self.min_frequency() as f64),
            format_mhz(self.max_frequency() as f64),
            self.bandwidth as f64 / 1e3
        )
    }
}
