// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::PI;

use num_complex::Complex;

use crate::error::FilterDesignError;

/// Taps per input channel of the synthesis filter.
pub const SYNTHESIS_TAPS_PER_CHANNEL: usize = 16;

/// Window applied to the ideal sinc response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Hann,
    /// 4-term Blackman-Harris, ~92 dB sidelobes.
    BlackmanHarris,
}

impl Window {
    fn coefficient(self, i: usize, taps: usize) -> f64 {
        if taps == 1 {
            return 1.0;
        }
        let x = 2.0 * PI * i as f64 / (taps - 1) as f64;
        match self {
            Window::Hann => 0.5 * (1.0 - x.cos()),
            Window::BlackmanHarris => {
                0.35875 - 0.48829 * x.cos() + 0.14128 * (2.0 * x).cos()
                    - 0.01168 * (3.0 * x).cos()
            }
        }
    }
}

/// Windowed-sinc low-pass coefficients normalised to unit DC gain.
///
/// `cutoff_norm`: cutoff as a fraction of the sample rate, in (0, 0.5).
pub fn windowed_sinc_coeffs(
    cutoff_norm: f64,
    taps: usize,
    window: Window,
) -> Result<Vec<f32>, FilterDesignError> {
    if taps == 0 {
        return Err(FilterDesignError::NoTaps);
    }
    if !(cutoff_norm > 0.0 && cutoff_norm < 0.5) {
        return Err(FilterDesignError::CutoffOutOfRange(cutoff_norm));
    }

    let m = (taps - 1) as f64;
    let mut coeffs: Vec<f64> = (0..taps)
        .map(|i| {
            let x = i as f64 - m / 2.0;
            let sinc = if x == 0.0 {
                2.0 * cutoff_norm
            } else {
                (2.0 * PI * cutoff_norm * x).sin() / (PI * x)
            };
            sinc * window.coefficient(i, taps)
        })
        .collect();

    let sum: f64 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        let inv = 1.0 / sum;
        for coeff in &mut coeffs {
            *coeff *= inv;
        }
    }
    Ok(coeffs.into_iter().map(|c| c as f32).collect())
}

/// Prototype filter for an M/2 polyphase channelizer.
///
/// `channel_count × taps_per_channel` taps, cutoff at half a channel so the
/// response is -6 dB at the channel edge and adjacent channels sum flat.
pub fn channelizer_prototype(
    channel_count: usize,
    taps_per_channel: usize,
) -> Result<Vec<f32>, FilterDesignError> {
    if channel_count < 2 {
        return Err(FilterDesignError::InvalidChannelCount(channel_count));
    }
    if taps_per_channel == 0 {
        return Err(FilterDesignError::NoTaps);
    }
    windowed_sinc_coeffs(
        1.0 / (2.0 * channel_count as f64),
        channel_count * taps_per_channel,
        Window::BlackmanHarris,
    )
}

/// Low-pass used to recombine `channel_count` adjacent channelizer outputs.
///
/// Runs at the interpolated rate `channel_count × channel_sample_rate`; the
/// cutoff is the composite band edge `channel_count × bandwidth / 2`.
pub fn synthesis_filter(
    channel_sample_rate: f64,
    channel_bandwidth: f64,
    channel_count: usize,
) -> Result<Vec<f32>, FilterDesignError> {
    if !channel_sample_rate.is_finite() || channel_sample_rate <= 0.0 {
        return Err(FilterDesignError::InvalidSampleRate(channel_sample_rate));
    }
    if !channel_bandwidth.is_finite() || channel_bandwidth <= 0.0 {
        return Err(FilterDesignError::InvalidBandwidth(channel_bandwidth));
    }
    if channel_count < 2 {
        return Err(FilterDesignError::InvalidChannelCount(channel_count));
    }
    let count = channel_count as f64;
    let cutoff = (count * channel_bandwidth / 2.0) / (count * channel_sample_rate);
    windowed_sinc_coeffs(
        cutoff,
        channel_count * SYNTHESIS_TAPS_PER_CHANNEL + 1,
        Window::Hann,
    )
}

/// Magnitude response of `taps` at `freq_norm` (fraction of the sample rate).
pub fn magnitude_response(taps: &[f32], freq_norm: f64) -> f64 {
    let (mut re, mut im) = (0.0_f64, 0.0_f64);
    for (i, &c) in taps.iter().enumerate() {
        let phase = 2.0 * PI * freq_norm * i as f64;
        re += c as f64 * phase.cos();
        im += c as f64 * phase.sin();
    }
    re.hypot(im)
}

/// Direct-form FIR over complex samples with real coefficients.
pub struct ComplexFirFilter {
    coeffs: Vec<f32>,
    /// Ring buffer of the last `coeffs.len()` samples; `pos` is the newest.
    state: Vec<Complex<f32>>,
    pos: usize,
}

impl ComplexFirFilter {
    pub fn new(coeffs: Vec<f32>) -> Self {
        let len = coeffs.len().max(1);
        Self {
            coeffs,
            state: vec![Complex::new(0.0, 0.0); len],
            pos: 0,
        }
    }

    /// Shift a sample into the delay line without computing an output.
    pub fn push(&mut self, sample: Complex<f32>) {
        self.pos = (self.pos + 1) % self.state.len();
        self.state[self.pos] = sample;
    }

    /// Filter output for the current delay line contents.
    pub fn output(&self) -> Complex<f32> {
        let n = self.state.len();
        let mut acc = Complex::new(0.0_f32, 0.0_f32);
        for (k, &coeff) in self.coeffs.iter().enumerate() {
            acc += self.state[(self.pos + n - k) % n] * coeff;
        }
        acc
    }

    pub fn process(&mut self, sample: Complex<f32>) -> Complex<f32> {
        self.push(sample);
        self.output()
    }

    pub fn reset(&mut self) {
        self.state.fill(Complex::new(0.0, 0.0));
        self.pos = 0;
    }
}
