// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample buffer types passed between the tuner, the channelizer and
//! channel consumers.

use num_complex::Complex;

/// Wideband buffer of interleaved I/Q floats (`[i0, q0, i1, q1, ...]`).
///
/// `timestamp` is the capture time of the first sample in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct InterleavedSamples {
    pub samples: Vec<f32>,
    pub timestamp: u64,
}

impl InterleavedSamples {
    pub fn new(samples: Vec<f32>, timestamp: u64) -> Self {
        Self { samples, timestamp }
    }

    /// Interleave a slice of complex samples.
    pub fn from_complex(samples: &[Complex<f32>], timestamp: u64) -> Self {
        let mut interleaved = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            interleaved.push(sample.re);
            interleaved.push(sample.im);
        }
        Self {
            samples: interleaved,
            timestamp,
        }
    }

    /// Number of complex samples in the buffer.
    pub fn complex_len(&self) -> usize {
        self.samples.len() / 2
    }
}

/// Buffer of complex baseband samples emitted by a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexSamples {
    pub samples: Vec<Complex<f32>>,
    pub timestamp: u64,
}

impl ComplexSamples {
    pub fn new(samples: Vec<Complex<f32>>, timestamp: u64) -> Self {
        Self { samples, timestamp }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of `|x|²` over the buffer, 0.0 for an empty buffer.
    pub fn mean_power(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / self.samples.len() as f32
    }
}
