// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

use super::filter::ComplexFirFilter;

/// `e^{jπk/4}`: one eighth of a turn per interpolated sample, i.e. a quarter
/// of the channel bandwidth at the 2× interpolated rate.
fn rotation_table() -> [Complex<f32>; 8] {
    let mut table = [Complex::new(0.0, 0.0); 8];
    for (k, value) in table.iter_mut().enumerate() {
        *value = Complex::from_polar(1.0, std::f32::consts::PI * k as f32 / 4.0);
    }
    table
}

/// Recombines two adjacent channelizer bins into one channel centered on
/// the edge they share.
///
/// Each bin is interpolated by 2 with the even/odd phases of the synthesis
/// filter, the lower bin is shifted down and the upper bin up by half a
/// channel bandwidth, and the sum is low-pass filtered and decimated by 2.
/// The output runs at the channel sample rate.
pub struct TwoChannelSynthesizer {
    even: Vec<f32>,
    odd: Vec<f32>,
    lower: Vec<Complex<f32>>,
    upper: Vec<Complex<f32>>,
    /// Index of the newest sample in `lower`/`upper`.
    pos: usize,
    rotation: [Complex<f32>; 8],
    phase: usize,
    decimator: ComplexFirFilter,
}

impl TwoChannelSynthesizer {
    pub fn new(taps: &[f32]) -> Self {
        let mut synth = Self {
            even: Vec::new(),
            odd: Vec::new(),
            lower: Vec::new(),
            upper: Vec::new(),
            pos: 0,
            rotation: rotation_table(),
            phase: 0,
            decimator: ComplexFirFilter::new(Vec::new()),
        };
        synth.set_filter(taps);
        synth
    }

    /// Install new synthesis taps. Delay lines restart from silence.
    pub fn set_filter(&mut self, taps: &[f32]) {
        // Interpolation by 2 halves the per-phase gain; scale it back.
        self.even = taps.iter().step_by(2).map(|t| t * 2.0).collect();
        self.odd = taps.iter().skip(1).step_by(2).map(|t| t * 2.0).collect();
        let len = self.even.len().max(1);
        self.lower = vec![Complex::new(0.0, 0.0); len];
        self.upper = vec![Complex::new(0.0, 0.0); len];
        self.pos = 0;
        self.phase = 0;
        self.decimator = ComplexFirFilter::new(taps.to_vec());
    }

    fn interpolate(&self, coeffs: &[f32], line: &[Complex<f32>]) -> Complex<f32> {
        let n = line.len();
        let mut acc = Complex::new(0.0_f32, 0.0_f32);
        for (k, &c) in coeffs.iter().enumerate() {
            acc += line[(self.pos + n - k) % n] * c;
        }
        acc
    }

    fn rotate(&mut self, lower: Complex<f32>, upper: Complex<f32>) -> Complex<f32> {
        let rot = self.rotation[self.phase];
        self.phase = (self.phase + 1) % self.rotation.len();
        lower * rot.conj() + upper * rot
    }

    /// Consume one sample from each bin and produce one output sample.
    pub fn process(&mut self, lower: Complex<f32>, upper: Complex<f32>) -> Complex<f32> {
        let n = self.lower.len();
        self.pos = (self.pos + 1) % n;
        self.lower[self.pos] = lower;
        self.upper[self.pos] = upper;

        let lower_even = self.interpolate(&self.even, &self.lower);
        let upper_even = self.interpolate(&self.even, &self.upper);
        let lower_odd = self.interpolate(&self.odd, &self.lower);
        let upper_odd = self.interpolate(&self.odd, &self.upper);

        let first = self.rotate(lower_even, upper_even);
        let second = self.rotate(lower_odd, upper_odd);

        // Keep the first of every two interpolated samples.
        let output = self.decimator.process(first);
        self.decimator.push(second);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::channelizer::{ChannelResultsFrame, ChannelResultsListener, PolyphaseChannelizer};
    use crate::dsp::filter::synthesis_filter;
    use crate::scheduler::ManualScheduler;
    use std::f32::consts::PI;
    use std::sync::{Arc, Mutex};
    use trx_core::{ChannelId, InterleavedSamples};

    struct Collector {
        id: ChannelId,
        frames: Mutex<Vec<ChannelResultsFrame>>,
    }

    impl ChannelResultsListener for Collector {
        fn channel_id(&self) -> ChannelId {
            self.id
        }

        fn receive_channel_results(&self, frames: &[ChannelResultsFrame]) -> Result<(), String> {
            self.frames.lock().unwrap().extend(frames.iter().cloned());
            Ok(())
        }
    }

    /// Channelize a tone at `bins` channel bandwidths above center and
    /// synthesize bins 1 and 2 from an 8-channel bank.
    fn synthesize_tone(bins: f32) -> Vec<Complex<f32>> {
        let channel_count = 8;
        let mut ch =
            PolyphaseChannelizer::new(200_000.0, channel_count, 16, Arc::new(ManualScheduler::new()))
                .unwrap();
        let collector = Arc::new(Collector {
            id: ChannelId::new(),
            frames: Mutex::new(Vec::new()),
        });
        ch.add_channel(collector.clone());

        let samples: Vec<Complex<f32>> = (0..2000)
            .map(|n| Complex::from_polar(1.0, 2.0 * PI * bins / channel_count as f32 * n as f32))
            .collect();
        ch.receive(&InterleavedSamples::from_complex(&samples, 0));
        ch.dispatch_pending();

        let taps = synthesis_filter(50_000.0, 25_000.0, 2).unwrap();
        let mut synth = TwoChannelSynthesizer::new(&taps);
        let frames = collector.frames.lock().unwrap();
        frames
            .iter()
            .map(|f| synth.process(f.bin(1), f.bin(2)))
            .collect()
    }

    #[test]
    fn test_sub_filters_split_taps() {
        let synth = TwoChannelSynthesizer::new(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(synth.even, vec![2.0, 6.0, 10.0]);
        assert_eq!(synth.odd, vec![4.0, 8.0]);
    }

    #[test]
    fn test_tone_near_shared_edge_keeps_unit_gain() {
        // 0.2 channel bandwidths above the 1/2 edge.
        let output = synthesize_tone(1.7);
        assert_eq!(output.len(), 500);
        for sample in &output[200..] {
            let magnitude = sample.norm();
            assert!(magnitude > 0.9 && magnitude < 1.1, "magnitude {}", magnitude);
        }
    }

    #[test]
    fn test_output_frequency_is_offset_from_edge() {
        // 0.2 BW above the edge at a 2 BW output rate: 0.1 cycles per sample.
        let output = synthesize_tone(1.7);
        let window = &output[200..];
        let mean_step: f32 = window
            .windows(2)
            .map(|w| (w[1] * w[0].conj()).arg())
            .sum::<f32>()
            / (window.len() - 1) as f32;
        assert!((mean_step - 2.0 * PI * 0.1).abs() < 0.05, "step {}", mean_step);

        let below = synthesize_tone(1.3);
        let window = &below[200..];
        let mean_step: f32 = window
            .windows(2)
            .map(|w| (w[1] * w[0].conj()).arg())
            .sum::<f32>()
            / (window.len() - 1) as f32;
        assert!((mean_step + 2.0 * PI * 0.1).abs() < 0.05, "step {}", mean_step);
    }

    #[test]
    fn test_set_filter_resets_state() {
        let taps = synthesis_filter(50_000.0, 25_000.0, 2).unwrap();
        let mut synth = TwoChannelSynthesizer::new(&taps);
        for _ in 0..10 {
            synth.process(Complex::new(1.0, 0.0), Complex::new(1.0, 0.0));
        }
        synth.set_filter(&taps);
        assert_eq!(synth.phase, 0);
        let out = synth.process(Complex::new(0.0, 0.0), Complex::new(0.0, 0.0));
        assert_eq!(out, Complex::new(0.0, 0.0));
    }
}
