// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod calculator;
pub mod channelizer;
pub mod filter;
pub mod oscillator;
pub mod output;
pub mod synthesis;
pub mod synthesizer;

use num_complex::Complex;

use crate::error::TunerError;

// ---------------------------------------------------------------------------
// IQ source abstraction
// ---------------------------------------------------------------------------

/// Abstraction over wideband IQ sample sources (tuner hardware or a simulator).
pub trait IqSource: Send + 'static {
    /// Read the next block of IQ samples into `buf`.
    /// Returns the number of samples written.
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> Result<usize, TunerError>;
}
