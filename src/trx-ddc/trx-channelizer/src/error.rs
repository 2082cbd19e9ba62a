// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;
use trx_core::TunerChannel;

/// A FIR filter could not be designed from the requested parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterDesignError {
    #[error("sample rate must be > 0 (got {0} Hz)")]
    InvalidSampleRate(f64),

    #[error("channel bandwidth must be > 0 (got {0} Hz)")]
    InvalidBandwidth(f64),

    #[error("filter needs at least one tap")]
    NoTaps,

    #[error("channel count {0} cannot be synthesized (expected at least 2)")]
    InvalidChannelCount(usize),

    #[error("normalized cutoff {0} is outside (0, 0.5)")]
    CutoffOutOfRange(f64),
}

/// Channelizer bin index math failed for a channel or index.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelIndexError {
    #[error(
        "requested channel [{min} - {max}] exceeds channelizer frequency range [{range_min} - {range_max}]"
    )]
    OutOfRange {
        min: i64,
        max: i64,
        range_min: i64,
        range_max: i64,
    },

    #[error("requested bandwidth is within two channel bandwidths of the sample rate")]
    Unsourceable,

    #[error("illegal channel index {index} (channel count {channel_count})")]
    InvalidIndex { index: usize, channel_count: usize },

    #[error("channel index list is empty")]
    EmptyIndexes,

    #[error("no output processor for {0} channel indexes (supported: 1 or 2)")]
    UnsupportedIndexCount(usize),
}

/// Channelizer construction / reconfiguration failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelizerError {
    #[error("channel count must be even (got {0})")]
    OddChannelCount(usize),

    #[error("sample rate {0} Hz cannot be channelized")]
    InvalidSampleRate(f64),

    #[error("filter design failed: {0}")]
    FilterDesign(#[from] FilterDesignError),
}

/// Center frequency search failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    #[error("no tuner channels to place")]
    NoChannels,

    #[error("channel set spans {span} Hz but only {usable} Hz is usable")]
    ChannelSetTooWide { span: i64, usable: i64 },

    #[error("cannot calculate viable center frequency for the channel set")]
    NoViableCenterFrequency,
}

/// Tuner controller failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TunerError {
    #[error("frequency {frequency} Hz is outside tunable range [{min} - {max}]")]
    FrequencyOutOfRange { frequency: i64, min: i64, max: i64 },

    #[error("tuner error: {0}")]
    Device(String),
}

/// A channel could not be admitted. Admission failures leave shared state untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionError {
    #[error("channel {0} is outside the tuner's tunable range")]
    NotTunable(TunerChannel),

    #[error("channel set cannot fit the tuner's usable bandwidth")]
    ChannelSetNotTunable,

    #[error("channel manager is stopped")]
    Stopped,

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Index(#[from] ChannelIndexError),

    #[error(transparent)]
    FilterDesign(#[from] FilterDesignError),

    #[error(transparent)]
    Channelizer(#[from] ChannelizerError),

    #[error(transparent)]
    Tuner(#[from] TunerError),
}
