// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bin-aligned center frequency search.
//!
//! Strategies run cheapest first; the first one that yields a valid center
//! wins. The last one walks the available spectrum 1 Hz at a time and always
//! terminates because the walk is bounded by the usable bandwidth.

use std::fmt;

use tracing::debug;
use trx_core::TunerChannel;

use super::{is_valid_center_frequency, TunerLimits};
use crate::error::PlacementError;

/// Inputs shared by every strategy.
#[derive(Debug, Clone)]
pub struct SearchContext<'a> {
    /// Channel set sorted by frequency.
    pub channels: &'a [TunerChannel],
    pub limits: &'a TunerLimits,
    pub channel_bandwidth: f64,
    pub current_center: i64,
}

impl SearchContext<'_> {
    fn first(&self) -> Option<&TunerChannel> {
        self.channels.first()
    }

    fn span(&self) -> i64 {
        channel_set_bandwidth(self.channels)
    }

    fn is_valid(&self, center: i64) -> bool {
        is_valid_center_frequency(self.channels, center, self.limits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Keep the current center when it is bin-aligned with the set.
    ReuseCurrent,
    /// Step up one channel bandwidth at a time from just below the first channel.
    IntegralGrid,
    /// Step down from the first channel pinned at the bottom of the band.
    BoundedStepped,
    /// Walk down 1 Hz at a time across the available spectrum.
    ExhaustiveWalk,
}

/// Strategies in the order they are tried.
pub const LADDER: [SearchStrategy; 4] = [
    SearchStrategy::ReuseCurrent,
    SearchStrategy::IntegralGrid,
    SearchStrategy::BoundedStepped,
    SearchStrategy::ExhaustiveWalk,
];

impl SearchStrategy {
    pub fn apply(&self, ctx: &SearchContext<'_>) -> Option<i64> {
        match self {
            SearchStrategy::ReuseCurrent => reuse_current(ctx),
            SearchStrategy::IntegralGrid => integral_grid(ctx),
            SearchStrategy::BoundedStepped => bounded_stepped(ctx),
            SearchStrategy::ExhaustiveWalk => exhaustive_walk(ctx),
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchStrategy::ReuseCurrent => "reuse current",
            SearchStrategy::IntegralGrid => "integral grid",
            SearchStrategy::BoundedStepped => "bounded stepped",
            SearchStrategy::ExhaustiveWalk => "exhaustive walk",
        };
        f.write_str(name)
    }
}

/// Distance from the lowest channel edge to the highest.
pub fn channel_set_bandwidth(channels: &[TunerChannel]) -> i64 {
    match (channels.first(), channels.last()) {
        (Some(first), Some(last)) => last.max_frequency() - first.min_frequency(),
        _ => 0,
    }
}

/// True when the frequencies are a whole number of channel bandwidths apart
/// (within 1 Hz).
pub fn is_integral_spacing(a: i64, b: i64, channel_bandwidth: f64) -> bool {
    ((a - b).abs() as f64) % channel_bandwidth <= 1.0
}

/// Channel frequency with the smallest total off-grid distance to every other
/// channel. Ties keep the lowest channel.
pub fn integral_frequency(channels: &[TunerChannel], channel_bandwidth: f64) -> Option<i64> {
    let first = channels.first()?.frequency();
    if channels.len() == 1 {
        return Some(first);
    }

    let mut best = first;
    let mut best_score = f64::MAX;
    for (i, a) in channels.iter().enumerate() {
        let score: f64 = channels
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, b)| ((a.frequency() - b.frequency()).abs() as f64) % channel_bandwidth)
            .sum();
        if score < best_score {
            best_score = score;
            best = a.frequency();
        }
    }
    Some(best)
}

/// Whether the sorted channel set can share the tuner's usable bandwidth.
///
/// With an unusable center region, a set wider than half the usable band
/// must split into a lower and an upper group that each fit half of it.
pub fn can_tune_set(channels: &[TunerChannel], limits: &TunerLimits) -> bool {
    let usable = limits.usable_bandwidth();
    let half = limits.usable_half_bandwidth();

    let first = match channels {
        [] => return false,
        [only] => {
            return if limits.has_unusable_center() {
                only.bandwidth() < half
            } else {
                only.bandwidth() < usable
            };
        }
        [first, ..] => first,
    };

    let span = channel_set_bandwidth(channels);
    if span > usable {
        return false;
    }
    if !limits.has_unusable_center() || span < half {
        return true;
    }

    let mut first_upper: Option<&TunerChannel> = None;
    for channel in channels {
        match first_upper {
            None => {
                if channel.max_frequency() - first.min_frequency() > half {
                    if channel.bandwidth() > half {
                        return false;
                    }
                    first_upper = Some(channel);
                }
            }
            Some(upper) => {
                if channel.max_frequency() - upper.min_frequency() > half {
                    return false;
                }
            }
        }
    }
    true
}

pub fn reuse_current(ctx: &SearchContext<'_>) -> Option<i64> {
    let best = integral_frequency(ctx.channels, ctx.channel_bandwidth)?;
    (is_integral_spacing(ctx.current_center, best, ctx.channel_bandwidth)
        && ctx.is_valid(ctx.current_center))
    .then_some(ctx.current_center)
}

pub fn integral_grid(ctx: &SearchContext<'_>) -> Option<i64> {
    let first = ctx.first()?;
    let step = ctx.channel_bandwidth as i64;
    if step <= 0 {
        return None;
    }
    let half = ctx.limits.usable_half_bandwidth();

    let mut center = first.frequency() - step;
    if ctx.is_valid(center) {
        return Some(center);
    }
    while center - first.min_frequency() < half {
        center += step;
        if ctx.is_valid(center) {
            return Some(center);
        }
    }
    None
}

pub fn bounded_stepped(ctx: &SearchContext<'_>) -> Option<i64> {
    let first = ctx.first()?;
    let best = integral_frequency(ctx.channels, ctx.channel_bandwidth)?;
    if ctx.channel_bandwidth <= 0.0 {
        return None;
    }

    // First channel at the bottom of the usable band, nudged onto the grid.
    let mut start = (first.min_frequency() + ctx.limits.usable_half_bandwidth()) as f64;
    let delta = (start - best as f64).abs();
    start += delta % ctx.channel_bandwidth;

    let available = ctx.limits.usable_bandwidth() - ctx.span();
    let steps = (available as f64 / ctx.channel_bandwidth) as i64 + 1;

    if ctx.is_valid(start as i64) {
        return Some(start as i64);
    }
    (1..=steps)
        .map(|step| (start - step as f64 * ctx.channel_bandwidth) as i64)
        .find(|&center| ctx.is_valid(center))
}

pub fn exhaustive_walk(ctx: &SearchContext<'_>) -> Option<i64> {
    let first = ctx.first()?;
    let available = ctx.limits.usable_bandwidth() - ctx.span();
    let start = first.min_frequency() + ctx.limits.usable_half_bandwidth();
    let minimum = start - available;

    if ctx.is_valid(start) {
        return Some(start);
    }
    // Inclusive of one step past `minimum`.
    ((minimum - 1)..start)
        .rev()
        .find(|&center| ctx.is_valid(center))
}

/// Run the ladder. An empty set keeps the current center.
pub fn search_center_frequency(
    ctx: &SearchContext<'_>,
) -> Result<(SearchStrategy, i64), PlacementError> {
    if ctx.channels.is_empty() {
        return Ok((SearchStrategy::ReuseCurrent, ctx.current_center));
    }

    let span = ctx.span();
    let usable = ctx.limits.usable_bandwidth();
    if span > usable {
        return Err(PlacementError::ChannelSetTooWide { span, usable });
    }

    for strategy in LADDER {
        if let Some(center) = strategy.apply(ctx) {
            debug!("Center frequency {} Hz found by {} search", center, strategy);
            return Ok((strategy, center));
        }
    }
    Err(PlacementError::NoViableCenterFrequency)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(usable_bandwidth: f64, unusable: i64) -> TunerLimits {
        TunerLimits {
            minimum_frequency: 0,
            maximum_frequency: 2_000_000_000,
            sample_rate: usable_bandwidth,
            usable_bandwidth_fraction: 1.0,
            unusable_center_half_width: unusable,
        }
    }

    fn ch(frequency: i64, bandwidth: i64) -> TunerChannel {
        TunerChannel::new(frequency, bandwidth).unwrap()
    }

    fn search(
        channels: &[TunerChannel],
        limits: &TunerLimits,
        current: i64,
    ) -> Result<(SearchStrategy, i64), PlacementError> {
        search_center_frequency(&SearchContext {
            channels,
            limits,
            channel_bandwidth: 25_000.0,
            current_center: current,
        })
    }

    #[test]
    fn test_integral_helpers() {
        assert!(is_integral_spacing(1_000_000, 1_075_000, 25_000.0));
        assert!(is_integral_spacing(1_000_001, 1_075_000, 25_000.0));
        assert!(!is_integral_spacing(1_000_002, 1_075_000, 25_000.0));

        let set = [ch(1_000_000, 12_500), ch(1_030_000, 12_500), ch(1_055_000, 12_500)];
        assert_eq!(integral_frequency(&set, 25_000.0), Some(1_030_000));
        assert_eq!(integral_frequency(&set[..1], 25_000.0), Some(1_000_000));
        assert_eq!(integral_frequency(&[], 25_000.0), None);
        assert_eq!(channel_set_bandwidth(&set), 1_061_250 - 993_750);
    }

    #[test]
    fn test_reuse_current() {
        let l = limits(2_000_000.0, 0);
        assert_eq!(
            search(&[ch(1_000_000, 25_000)], &l, 1_500_000),
            Ok((SearchStrategy::ReuseCurrent, 1_500_000))
        );
    }

    #[test]
    fn test_integral_grid() {
        let l = limits(2_000_000.0, 0);
        assert_eq!(
            search(&[ch(1_000_000, 25_000)], &l, 1_500_007),
            Ok((SearchStrategy::IntegralGrid, 975_000))
        );

        let l = limits(2_000_000.0, 50_000);
        assert_eq!(
            search(&[ch(1_000_000, 25_000)], &l, 5_000_000),
            Ok((SearchStrategy::IntegralGrid, 1_075_000))
        );
    }

    #[test]
    fn test_bounded_stepped() {
        let l = limits(320_000.0, 30_000);
        let set = [ch(1_000_000, 25_000), ch(1_050_000, 25_000), ch(1_100_000, 25_000)];
        assert_eq!(
            search(&set, &l, 5_000_000),
            Ok((SearchStrategy::BoundedStepped, 1_145_000))
        );
    }

    #[test]
    fn test_exhaustive_walk() {
        // Valid centers span only 1.0825 - 1.0875 MHz, off both grids.
        let l = limits(200_000.0, 0);
        let set = [ch(1_000_000, 25_000), ch(1_170_000, 25_000)];
        assert_eq!(
            search(&set, &l, 5_000_000),
            Ok((SearchStrategy::ExhaustiveWalk, 1_087_500))
        );
    }

    #[test]
    fn test_exhaustion_and_width_errors() {
        let l = limits(300_000.0, 30_000);
        let set = [ch(1_000_000, 25_000), ch(1_050_000, 25_000), ch(1_100_000, 25_000)];
        assert_eq!(
            search(&set, &l, 1_000_000),
            Err(PlacementError::NoViableCenterFrequency)
        );

        let l = limits(100_000.0, 0);
        assert!(matches!(
            search(&set, &l, 1_000_000),
            Err(PlacementError::ChannelSetTooWide { .. })
        ));

        assert_eq!(search(&[], &l, 42), Ok((SearchStrategy::ReuseCurrent, 42)));
    }

    #[test]
    fn test_found_centers_are_valid() {
        let l = limits(2_000_000.0, 20_000);
        let set = [ch(100_000_000, 12_500), ch(100_337_500, 25_000), ch(100_900_000, 12_500)];
        let (_, center) = search(&set, &l, 0).unwrap();
        assert!(is_valid_center_frequency(&set, center, &l));
    }

    #[test]
    fn test_can_tune_set() {
        let plain = limits(2_000_000.0, 0);
        assert!(can_tune_set(&[ch(1_000_000, 25_000)], &plain));
        assert!(!can_tune_set(&[ch(1_000_000, 2_000_000)], &plain));
        assert!(can_tune_set(&[ch(1_000_000, 25_000), ch(2_975_000, 25_000)], &plain));
        assert!(!can_tune_set(&[ch(1_000_000, 25_000), ch(3_000_000, 25_000)], &plain));
        assert!(!can_tune_set(&[], &plain));

        let dc = limits(2_000_000.0, 10_000);
        assert!(!can_tune_set(&[ch(1_000_000, 1_000_000)], &dc));
        assert!(can_tune_set(&[ch(1_000_000, 999_000)], &dc));
        // Lower group and upper group each fit half the band.
        let split = [
            ch(1_000_000, 25_000),
            ch(1_500_000, 25_000),
            ch(2_100_000, 25_000),
            ch(2_800_000, 25_000),
        ];
        assert!(can_tune_set(&split, &dc));
        // Upper group wider than half the band.
        let unsplit = [
            ch(1_000_000, 25_000),
            ch(1_990_000, 25_000),
            ch(2_970_000, 25_000),
        ];
        assert!(!can_tune_set(&unsplit, &dc));
    }
}
