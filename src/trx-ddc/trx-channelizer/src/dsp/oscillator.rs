// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::TAU;

use num_complex::Complex;

/// Complex oscillator producing `e^{+j2π·f·n/fs}`.
///
/// Samples are generated by rotating with a sin/cos recurrence; the phase
/// accumulator is re-anchored after every block so rounding error does not
/// build up.
#[derive(Debug, Clone)]
pub struct Oscillator {
    frequency: f64,
    sample_rate: f64,
    phase: f64,
    phase_inc: f64,
}

impl Oscillator {
    pub fn new(frequency: f64, sample_rate: f64) -> Self {
        let mut osc = Self {
            frequency,
            sample_rate,
            phase: 0.0,
            phase_inc: 0.0,
        };
        osc.update_increment();
        osc
    }

    fn update_increment(&mut self) {
        self.phase_inc = if self.sample_rate > 0.0 {
            TAU * self.frequency / self.sample_rate
        } else {
            0.0
        };
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Retune without a phase discontinuity.
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
        self.update_increment();
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.update_increment();
    }

    /// Current phase in radians, in `[0, 2π)`.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Multiply `samples` in place by successive oscillator samples.
    pub fn mix(&mut self, samples: &mut [Complex<f32>]) {
        if self.phase_inc == 0.0 {
            let (sin, cos) = self.phase.sin_cos();
            let lo = Complex::new(cos as f32, sin as f32);
            for sample in samples.iter_mut() {
                *sample *= lo;
            }
            return;
        }

        let phase_start = self.phase;
        let (mut sin_phase, mut cos_phase) = phase_start.sin_cos();
        let (sin_inc, cos_inc) = self.phase_inc.sin_cos();
        for sample in samples.iter_mut() {
            *sample *= Complex::new(cos_phase as f32, sin_phase as f32);
            let next_sin = sin_phase * cos_inc + cos_phase * sin_inc;
            let next_cos = cos_phase * cos_inc - sin_phase * sin_inc;
            sin_phase = next_sin;
            cos_phase = next_cos;
        }
        self.phase = (phase_start + samples.len() as f64 * self.phase_inc).rem_euclid(TAU);
    }
}
