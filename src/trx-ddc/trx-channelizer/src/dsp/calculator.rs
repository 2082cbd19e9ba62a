// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Frequency ↔ channelizer bin arithmetic.
//!
//! Bin 0 is centered on the tuner frequency, bins `1..N/2` climb above it and
//! bins `N/2+1..N` sit below it. The wrap-around bin `N/2` straddles both band
//! edges, so its geometry depends on an [`IndexBoundaryPolicy`].

use std::fmt;

use trx_core::radio::format_mhz;
use trx_core::TunerChannel;

use crate::error::{ChannelIndexError, ChannelizerError};

/// Narrowest channel the default channel count is sized for (Hz).
pub const MINIMUM_CHANNEL_BANDWIDTH: f64 = 25_000.0;

/// Channel output rate relative to channel bandwidth.
pub const DEFAULT_OVERSAMPLING: f64 = 2.0;

/// Resolves frequencies that fall exactly on the edge shared by two bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBoundaryPolicy {
    /// Prefer the higher bin.
    AdjustPositive,
    /// Prefer the lower bin.
    AdjustNegative,
}

/// Channel count used for a sample rate: one bin per
/// [`MINIMUM_CHANNEL_BANDWIDTH`], rounded down to an even number.
pub fn default_channel_count(sample_rate: f64) -> usize {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return 0;
    }
    let count = (sample_rate / MINIMUM_CHANNEL_BANDWIDTH) as usize;
    count - count % 2
}

fn validate_rates(sample_rate: f64, channel_count: usize) -> Result<(), ChannelizerError> {
    if channel_count == 0 || channel_count % 2 != 0 {
        return Err(ChannelizerError::OddChannelCount(channel_count));
    }
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(ChannelizerError::InvalidSampleRate(sample_rate));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCalculator {
    sample_rate: f64,
    channel_count: usize,
    center_frequency: i64,
    oversampling: f64,
}

impl ChannelCalculator {
    pub fn new(
        sample_rate: f64,
        channel_count: usize,
        center_frequency: i64,
        oversampling: f64,
    ) -> Result<Self, ChannelizerError> {
        validate_rates(sample_rate, channel_count)?;
        Ok(Self {
            sample_rate,
            channel_count,
            center_frequency,
            oversampling,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn center_frequency(&self) -> i64 {
        self.center_frequency
    }

    pub fn set_center_frequency(&mut self, frequency: i64) {
        self.center_frequency = frequency;
    }

    /// Change sample rate and channel count together. State is untouched on error.
    pub fn set_rates(
        &mut self,
        sample_rate: f64,
        channel_count: usize,
    ) -> Result<(), ChannelizerError> {
        validate_rates(sample_rate, channel_count)?;
        self.sample_rate = sample_rate;
        self.channel_count = channel_count;
        Ok(())
    }

    pub fn oversampling(&self) -> f64 {
        self.oversampling
    }

    pub fn channel_bandwidth(&self) -> f64 {
        self.sample_rate / self.channel_count as f64
    }

    pub fn half_channel_bandwidth(&self) -> f64 {
        self.channel_bandwidth() / 2.0
    }

    pub fn channel_sample_rate(&self) -> f64 {
        self.channel_bandwidth() * self.oversampling
    }

    pub fn wrap_around_index(&self) -> usize {
        self.channel_count / 2
    }

    /// Lowest frequency the channelizer can provide.
    pub fn minimum_frequency(&self) -> i64 {
        (self.center_frequency as f64 - self.sample_rate / 2.0) as i64
    }

    /// Highest frequency the channelizer can provide.
    pub fn maximum_frequency(&self) -> i64 {
        (self.center_frequency as f64 + self.sample_rate / 2.0) as i64
    }

    fn normalize(&self, index: isize) -> usize {
        index.rem_euclid(self.channel_count as isize) as usize
    }

    fn check_index(&self, index: usize) -> Result<(), ChannelIndexError> {
        if index >= self.channel_count {
            return Err(ChannelIndexError::InvalidIndex {
                index,
                channel_count: self.channel_count,
            });
        }
        Ok(())
    }

    /// Ordered bins covering `channel`, walking upward from the bin of its
    /// lowest frequency to the bin of its highest (modulo channel count).
    pub fn channel_indexes(&self, channel: &TunerChannel) -> Result<Vec<usize>, ChannelIndexError> {
        let range_min = self.minimum_frequency();
        let range_max = self.maximum_frequency();
        if channel.min_frequency() < range_min || channel.max_frequency() > range_max {
            return Err(ChannelIndexError::OutOfRange {
                min: channel.min_frequency(),
                max: channel.max_frequency(),
                range_min,
                range_max,
            });
        }

        let min_index =
            self.index_for_frequency(channel.min_frequency(), IndexBoundaryPolicy::AdjustPositive);
        let max_index =
            self.index_for_frequency(channel.max_frequency(), IndexBoundaryPolicy::AdjustNegative);

        // Both edges inside the wrap-around bin: the channel spans nearly the
        // whole sample rate and cannot be assembled from contiguous bins.
        let wrap = self.wrap_around_index();
        if min_index == wrap && max_index == wrap {
            return Err(ChannelIndexError::Unsourceable);
        }

        let mut indexes = vec![min_index];
        let mut pointer = min_index;
        while pointer != max_index {
            pointer = (pointer + 1) % self.channel_count;
            indexes.push(pointer);
        }
        Ok(indexes)
    }

    /// Bin containing `frequency`.
    pub fn index_for_frequency(&self, frequency: i64, policy: IndexBoundaryPolicy) -> usize {
        let half = self.half_channel_bandwidth();
        let mut offset = (frequency - self.center_frequency) as f64;

        if offset.abs() < half {
            return 0;
        }

        if offset > 0.0 {
            offset += half;
        } else {
            offset -= half;
        }

        let index = self.normalize((offset / self.channel_bandwidth()) as isize) as isize;

        match policy {
            IndexBoundaryPolicy::AdjustPositive
                if self.is_overlap_frequency(frequency, index, index + 1) =>
            {
                self.normalize(index + 1)
            }
            IndexBoundaryPolicy::AdjustNegative
                if self.is_overlap_frequency(frequency, index - 1, index) =>
            {
                self.normalize(index - 1)
            }
            _ => index as usize,
        }
    }

    /// True when `frequency` is exactly the edge shared by adjacent bins
    /// `index1` (below) and `index2` (above). Indexes wrap modulo channel count.
    pub fn is_overlap_frequency(&self, frequency: i64, index1: isize, index2: isize) -> bool {
        let index1 = self.normalize(index1);
        let index2 = self.normalize(index2);

        if self.normalize(index2 as isize - index1 as isize) != 1 {
            return false;
        }

        let wrap = self.wrap_around_index();
        let index1_policy = if index1 == wrap {
            IndexBoundaryPolicy::AdjustNegative
        } else {
            IndexBoundaryPolicy::AdjustPositive
        };
        let index2_policy = if index2 == wrap {
            IndexBoundaryPolicy::AdjustPositive
        } else {
            IndexBoundaryPolicy::AdjustNegative
        };

        let index1_max = self.index_maximum(index1, index1_policy) as i64;
        let index2_min = self.index_minimum(index2, index2_policy) as i64;
        frequency == index1_max && frequency == index2_min
    }

    fn index_center(&self, index: usize, policy: IndexBoundaryPolicy) -> f64 {
        let center = self.center_frequency as f64;
        let bw = self.channel_bandwidth();
        let wrap = self.wrap_around_index();

        if index == wrap {
            match policy {
                IndexBoundaryPolicy::AdjustPositive => center + index as f64 * bw,
                IndexBoundaryPolicy::AdjustNegative => center - index as f64 * bw,
            }
        } else if index < wrap {
            center + index as f64 * bw
        } else {
            center - (self.channel_count - index) as f64 * bw
        }
    }

    fn index_minimum(&self, index: usize, policy: IndexBoundaryPolicy) -> f64 {
        let center = self.center_frequency as f64;
        let bw = self.channel_bandwidth();
        let half = self.half_channel_bandwidth();
        let wrap = self.wrap_around_index();

        if index == wrap && policy == IndexBoundaryPolicy::AdjustNegative {
            self.index_center(index, policy)
        } else if index <= wrap {
            center + index as f64 * bw - half
        } else {
            center - (self.channel_count - index) as f64 * bw - half
        }
    }

    fn index_maximum(&self, index: usize, policy: IndexBoundaryPolicy) -> f64 {
        let center = self.center_frequency as f64;
        let bw = self.channel_bandwidth();
        let half = self.half_channel_bandwidth();
        let wrap = self.wrap_around_index();

        if index == wrap {
            match policy {
                IndexBoundaryPolicy::AdjustPositive => self.index_center(index, policy),
                IndexBoundaryPolicy::AdjustNegative => center - (index as f64 * bw - half),
            }
        } else if index < wrap {
            center + index as f64 * bw + half
        } else {
            center - (self.channel_count - index) as f64 * bw + half
        }
    }

    /// Center frequency of bin `index`.
    pub fn index_center_frequency(
        &self,
        index: usize,
        policy: IndexBoundaryPolicy,
    ) -> Result<f64, ChannelIndexError> {
        self.check_index(index)?;
        Ok(self.index_center(index, policy))
    }

    /// Lower edge of bin `index`.
    pub fn index_minimum_frequency(
        &self,
        index: usize,
        policy: IndexBoundaryPolicy,
    ) -> Result<f64, ChannelIndexError> {
        self.check_index(index)?;
        Ok(self.index_minimum(index, policy))
    }

    /// Upper edge of bin `index`.
    pub fn index_maximum_frequency(
        &self,
        index: usize,
        policy: IndexBoundaryPolicy,
    ) -> Result<f64, ChannelIndexError> {
        self.check_index(index)?;
        Ok(self.index_maximum(index, policy))
    }

    /// Center of the composite band formed by `indexes`: the middle bin's
    /// center for an odd count, the edge between the two middle bins otherwise.
    pub fn center_frequency_for_indexes(&self, indexes: &[usize]) -> Result<i64, ChannelIndexError> {
        if indexes.is_empty() {
            return Err(ChannelIndexError::EmptyIndexes);
        }
        for &index in indexes {
            self.check_index(index)?;
        }

        let index = indexes[(indexes.len() - 1) / 2];

        let frequency = if indexes.len() % 2 == 0 {
            self.index_maximum(index, IndexBoundaryPolicy::AdjustNegative)
        } else if index == self.wrap_around_index() {
            self.index_center(index, IndexBoundaryPolicy::AdjustNegative)
        } else {
            self.index_center(index, IndexBoundaryPolicy::AdjustPositive)
        };
        Ok(frequency as i64)
    }
}

impl fmt::Display for ChannelCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Channel Calculator | Tuner SR:{} CF:{} MIN:{} MAX:{} | Channel COUNT:{} BW:{} SR:{}",
            format_mhz(self.sample_rate),
            format_mhz(self.center_frequency as f64),
            format_mhz(self.minimum_frequency() as f64),
            format_mhz(self.maximum_frequency() as f64),
            self.channel_count,
            format_mhz(self.channel_bandwidth()),
            format_mhz(self.channel_sample_rate()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use IndexBoundaryPolicy::{AdjustNegative, AdjustPositive};

    fn calculator() -> ChannelCalculator {
        ChannelCalculator::new(1_000_000.0, 40, 500_000, DEFAULT_OVERSAMPLING).unwrap()
    }

    fn channel(frequency: i64, bandwidth: i64) -> TunerChannel {
        TunerChannel::new(frequency, bandwidth).unwrap()
    }

    #[test]
    fn test_geometry() {
        let calc = calculator();
        assert_eq!(calc.channel_bandwidth(), 25_000.0);
        assert_eq!(calc.channel_bandwidth() * calc.channel_count() as f64, calc.sample_rate());
        assert_eq!(calc.channel_sample_rate(), 50_000.0);
        assert_eq!(calc.wrap_around_index(), 20);
        assert_eq!(calc.minimum_frequency(), 0);
        assert_eq!(calc.maximum_frequency(), 1_000_000);
    }

    #[test]
    fn test_rejects_odd_channel_count() {
        assert_eq!(
            ChannelCalculator::new(1_000_000.0, 41, 0, 2.0),
            Err(ChannelizerError::OddChannelCount(41))
        );
        assert_eq!(
            ChannelCalculator::new(1_000_000.0, 0, 0, 2.0),
            Err(ChannelizerError::OddChannelCount(0))
        );
        let mut calc = calculator();
        assert!(calc.set_rates(0.0, 40).is_err());
        assert_eq!(calc.sample_rate(), 1_000_000.0);
    }

    #[test]
    fn test_default_channel_count() {
        assert_eq!(default_channel_count(1_000_000.0), 40);
        assert_eq!(default_channel_count(2_400_000.0), 96);
        assert_eq!(default_channel_count(2_375_000.0), 94);
        assert_eq!(default_channel_count(0.0), 0);
    }

    #[test]
    fn test_channel_on_bin_center_uses_single_index() {
        let calc = calculator();
        assert_eq!(calc.channel_indexes(&channel(525_000, 25_000)).unwrap(), vec![1]);
        assert_eq!(calc.channel_indexes(&channel(500_000, 25_000)).unwrap(), vec![0]);
        assert_eq!(calc.channel_indexes(&channel(475_000, 25_000)).unwrap(), vec![39]);
    }

    #[test]
    fn test_channel_on_bin_boundary_uses_two_indexes() {
        let calc = calculator();
        assert_eq!(calc.channel_indexes(&channel(512_500, 25_000)).unwrap(), vec![0, 1]);
        assert_eq!(calc.channel_indexes(&channel(487_500, 25_000)).unwrap(), vec![39, 0]);
    }

    #[test]
    fn test_wide_channel_indexes_are_contiguous() {
        let calc = calculator();
        let ch = channel(500_000, 110_000);
        let indexes = calc.channel_indexes(&ch).unwrap();
        assert_eq!(indexes, vec![38, 39, 0, 1, 2]);
        for pair in indexes.windows(2) {
            assert_eq!((pair[0] + 1) % 40, pair[1]);
        }
        let first_min = calc.index_minimum_frequency(indexes[0], AdjustPositive).unwrap();
        let last_max = calc
            .index_maximum_frequency(*indexes.last().unwrap(), AdjustNegative)
            .unwrap();
        assert!(first_min <= ch.min_frequency() as f64);
        assert!(last_max >= ch.max_frequency() as f64);
    }

    #[test]
    fn test_out_of_range_and_unsourceable() {
        let calc = calculator();
        assert!(matches!(
            calc.channel_indexes(&channel(500_000, 1_100_000)),
            Err(ChannelIndexError::OutOfRange { .. })
        ));
        assert!(matches!(
            calc.channel_indexes(&channel(1_000_000, 25_000)),
            Err(ChannelIndexError::OutOfRange { .. })
        ));
        assert_eq!(
            calc.channel_indexes(&channel(500_000, 990_000)),
            Err(ChannelIndexError::Unsourceable)
        );
    }

    #[test]
    fn test_policies_differ_only_on_boundaries() {
        let calc = calculator();
        for frequency in (2_000..998_000).step_by(500) {
            let pos = calc.index_for_frequency(frequency, AdjustPositive);
            let neg = calc.index_for_frequency(frequency, AdjustNegative);
            if pos != neg {
                assert_eq!((neg + 1) % 40, pos, "frequency {}", frequency);
                assert_eq!((frequency - 12_500) % 25_000, 0, "frequency {}", frequency);
            }
        }
    }

    #[test]
    fn test_index_center_round_trip() {
        let calc = calculator();
        for index in (0..40).filter(|&i| i != calc.wrap_around_index()) {
            for policy in [AdjustPositive, AdjustNegative] {
                let center = calc.index_center_frequency(index, policy).unwrap() as i64;
                assert_eq!(calc.index_for_frequency(center, policy), index);
            }
        }
    }

    #[test]
    fn test_wrap_around_geometry_depends_on_policy() {
        let calc = calculator();
        assert_eq!(calc.index_center_frequency(20, AdjustPositive).unwrap(), 1_000_000.0);
        assert_eq!(calc.index_center_frequency(20, AdjustNegative).unwrap(), 0.0);
        assert_eq!(calc.index_minimum_frequency(20, AdjustPositive).unwrap(), 987_500.0);
        assert_eq!(calc.index_maximum_frequency(20, AdjustNegative).unwrap(), 12_500.0);
        assert!(calc.is_overlap_frequency(12_500, 20, 21));
        assert!(calc.is_overlap_frequency(987_500, 19, 20));
    }

    #[test]
    fn test_invalid_index() {
        let calc = calculator();
        assert_eq!(
            calc.index_center_frequency(40, AdjustPositive),
            Err(ChannelIndexError::InvalidIndex {
                index: 40,
                channel_count: 40
            })
        );
    }

    #[test]
    fn test_center_frequency_for_indexes() {
        let calc = calculator();
        assert_eq!(calc.center_frequency_for_indexes(&[1]).unwrap(), 525_000);
        assert_eq!(calc.center_frequency_for_indexes(&[0, 1]).unwrap(), 512_500);
        assert_eq!(calc.center_frequency_for_indexes(&[39, 0, 1]).unwrap(), 500_000);
        assert_eq!(calc.center_frequency_for_indexes(&[39, 0]).unwrap(), 487_500);
        assert_eq!(
            calc.center_frequency_for_indexes(&[]),
            Err(ChannelIndexError::EmptyIndexes)
        );
    }

    #[test]
    fn test_overlap_requires_adjacent_bins() {
        let calc = calculator();
        assert!(calc.is_overlap_frequency(512_500, 0, 1));
        assert!(!calc.is_overlap_frequency(512_500, 1, 0));
        assert!(!calc.is_overlap_frequency(512_500, 0, 2));
        assert!(calc.is_overlap_frequency(487_500, -1, 0));
    }

    #[test]
    fn test_display() {
        let text = calculator().to_string();
        assert!(text.starts_with("Channel Calculator | Tuner SR:1.00000 CF:0.50000"));
        assert!(text.contains("COUNT:40"));
    }
}
