// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Tuner control and center frequency placement.

pub mod placement;
pub mod search;
pub mod simulated;
pub mod source_manager;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use trx_core::{FrequencyRange, ListenerId, SourceEventListener, TunerChannel};

use crate::error::TunerError;

/// Frequency and bandwidth limits of a tuner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerLimits {
    /// Lowest tunable frequency (Hz).
    pub minimum_frequency: i64,
    /// Highest tunable frequency (Hz).
    pub maximum_frequency: i64,
    /// Sample rate (Hz); equal to the sampled bandwidth.
    pub sample_rate: f64,
    /// Fraction of the sampled bandwidth that is usable, excluding roll-off
    /// at both band edges.
    pub usable_bandwidth_fraction: f64,
    /// Half width of the region around the LO that must stay free (Hz).
    /// Zero when the tuner has no DC spike.
    pub unusable_center_half_width: i64,
}

impl Default for TunerLimits {
    fn default() -> Self {
        Self {
            minimum_frequency: 1_000_000,
            maximum_frequency: 1_750_000_000,
            sample_rate: 2_000_000.0,
            usable_bandwidth_fraction: 0.9,
            unusable_center_half_width: 0,
        }
    }
}

impl TunerLimits {
    pub fn usable_bandwidth(&self) -> i64 {
        (self.sample_rate * self.usable_bandwidth_fraction) as i64
    }

    pub fn usable_half_bandwidth(&self) -> i64 {
        self.usable_bandwidth() / 2
    }

    pub fn has_unusable_center(&self) -> bool {
        self.unusable_center_half_width != 0
    }

    pub fn tunable_range(&self) -> FrequencyRange {
        FrequencyRange::new(self.minimum_frequency, self.maximum_frequency)
    }

    /// Whether `frequency` lies within the tunable range.
    pub fn can_tune(&self, frequency: i64) -> bool {
        self.tunable_range().contains(frequency)
    }

    /// Whether both edges of `channel` lie within the tunable range.
    pub fn is_tunable(&self, channel: &TunerChannel) -> bool {
        self.can_tune(channel.min_frequency()) && self.can_tune(channel.max_frequency())
    }

    /// True when `channel` fits the usable band around `center` and stays
    /// clear of the unusable center region.
    pub fn fits(&self, channel: &TunerChannel, center: i64) -> bool {
        let half = self.usable_half_bandwidth();
        let fits =
            channel.min_frequency() >= center - half && channel.max_frequency() <= center + half;
        if fits && self.has_unusable_center() {
            let u = self.unusable_center_half_width;
            return !channel.overlaps(center - u, center + u);
        }
        fits
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.minimum_frequency < 0 {
            return Err("minimum_frequency must be >= 0".to_string());
        }
        if self.maximum_frequency <= self.minimum_frequency {
            return Err("maximum_frequency must be > minimum_frequency".to_string());
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err("sample_rate must be > 0".to_string());
        }
        if !(self.usable_bandwidth_fraction > 0.0 && self.usable_bandwidth_fraction <= 1.0) {
            return Err("usable_bandwidth_fraction must be in (0, 1]".to_string());
        }
        if self.unusable_center_half_width < 0
            || self.unusable_center_half_width >= self.usable_half_bandwidth()
        {
            return Err(
                "unusable_center_half_width must be >= 0 and below half the usable bandwidth"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// True when `center` is valid for every channel in the set.
pub fn is_valid_center_frequency(channels: &[TunerChannel], center: i64, limits: &TunerLimits) -> bool {
    channels.iter().all(|channel| limits.fits(channel, center))
}

/// How admission picks a new tuner center frequency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// Search ladder preferring centers on the channelizer bin grid.
    #[default]
    BinAligned,
    /// Pack the channel set against the unusable center region.
    Compact,
}

/// Tuner hardware (or a stand-in) as seen by the source manager.
///
/// Frequency and sample rate changes are announced to registered listeners
/// as `FrequencyChange` / `SampleRateChange` events.
pub trait TunerController: Send + Sync {
    fn frequency(&self) -> i64;

    fn set_frequency(&self, frequency: i64) -> Result<(), TunerError>;

    fn sample_rate(&self) -> f64;

    fn limits(&self) -> TunerLimits;

    fn can_tune(&self, frequency: i64) -> bool {
        self.limits().can_tune(frequency)
    }

    /// Lock out frequency / sample rate changes from other controls while
    /// channels are allocated.
    fn set_locked(&self, locked: bool);

    fn is_locked(&self) -> bool;

    fn add_listener(&self, listener: Arc<dyn SourceEventListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}
