// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use trx_core::TunerChannel;

use super::{is_valid_center_frequency, TunerLimits};
use crate::error::PlacementError;

/// Compact placement: keeps the channel set against the edge of the
/// unusable center region so the rest of the band stays free.
#[derive(Debug, Clone, Copy)]
pub struct CenterFrequencyCalculator {
    limits: TunerLimits,
}

impl CenterFrequencyCalculator {
    pub fn new(limits: TunerLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &TunerLimits {
        &self.limits
    }

    pub fn is_valid_center_frequency(&self, channels: &[TunerChannel], center: i64) -> bool {
        is_valid_center_frequency(channels, center, &self.limits)
    }

    /// True when `channel` is tunable and can be placed together with `existing`.
    pub fn can_tune(&self, channel: &TunerChannel, existing: &[TunerChannel]) -> bool {
        if !self.limits.is_tunable(channel) {
            return false;
        }
        let mut channels = existing.to_vec();
        channels.push(*channel);
        self.center_frequency(&channels).is_ok()
    }

    /// Center frequency that keeps every channel inside the usable band and
    /// outside the unusable center region.
    pub fn center_frequency(&self, channels: &[TunerChannel]) -> Result<i64, PlacementError> {
        let mut channels = channels.to_vec();
        channels.sort();
        let Some(lowest) = channels.first().copied() else {
            return Err(PlacementError::NoChannels);
        };

        let usable = self.limits.usable_bandwidth();
        let minimum = channels
            .iter()
            .map(TunerChannel::min_frequency)
            .min()
            .unwrap_or(lowest.min_frequency());
        let maximum = channels
            .iter()
            .map(TunerChannel::max_frequency)
            .max()
            .unwrap_or(lowest.max_frequency());
        let span = maximum - minimum;
        if span > usable {
            return Err(PlacementError::ChannelSetTooWide { span, usable });
        }

        let candidate = if channels.len() == 1 {
            self.single_channel(&lowest)?
        } else {
            self.channel_set(&channels, &lowest, maximum)?
        };

        if self.is_valid_center_frequency(&channels, candidate) {
            Ok(candidate)
        } else {
            Err(PlacementError::NoViableCenterFrequency)
        }
    }

    fn single_channel(&self, channel: &TunerChannel) -> Result<i64, PlacementError> {
        let unusable = self.limits.unusable_center_half_width;
        if unusable == 0 {
            return Ok(channel.frequency());
        }
        // Right of the unusable region first, then left of it.
        [
            channel.min_frequency() - unusable - 1,
            channel.max_frequency() + unusable + 1,
        ]
        .into_iter()
        .find(|&c| self.limits.fits(channel, c))
        .ok_or(PlacementError::NoViableCenterFrequency)
    }

    fn channel_set(
        &self,
        channels: &[TunerChannel],
        lowest: &TunerChannel,
        maximum: i64,
    ) -> Result<i64, PlacementError> {
        let half = self.limits.usable_half_bandwidth();
        let unusable = self.limits.unusable_center_half_width;

        // Highest channel at the top of the usable band.
        let mut candidate = maximum - half;
        if !self.limits.has_unusable_center() {
            return Ok(candidate);
        }
        if maximum - lowest.min_frequency() > half {
            candidate = candidate.max(lowest.max_frequency() + unusable + 1);
        }

        loop {
            let overlapping = channels
                .iter()
                .find(|ch| ch.overlaps(candidate - unusable, candidate + unusable));
            let Some(channel) = overlapping else {
                return Ok(candidate);
            };
            let shifted = channel.max_frequency() + unusable + 1;
            if shifted - half > lowest.min_frequency() {
                return Err(PlacementError::NoViableCenterFrequency);
            }
            candidate = shifted;
        }
    }
}
