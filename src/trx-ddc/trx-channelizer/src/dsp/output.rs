// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-channel extraction of channelizer bins into baseband samples.

use std::collections::VecDeque;
use std::sync::Arc;

use num_complex::Complex;
use trx_core::ComplexSamples;

use super::channelizer::ChannelResultsFrame;
use super::oscillator::Oscillator;
use super::synthesis::SynthesisFilterManager;
use super::synthesizer::TwoChannelSynthesizer;
use crate::buffer::{OverflowListener, OverflowQueue};
use crate::error::{AdmissionError, ChannelIndexError};

/// Frames a processor may hold before shedding load: one second of output.
fn queue_limit(channel_sample_rate: f64) -> usize {
    (channel_sample_rate as usize).max(64)
}

// ---------------------------------------------------------------------------
// Sample assembler
// ---------------------------------------------------------------------------

/// Packs mixed samples into fixed-length [`ComplexSamples`] buffers.
///
/// Buffer timestamps are derived from the last upstream timestamp plus the
/// samples produced since it.
pub struct SampleAssembler {
    buffer_len: usize,
    sample_rate: f64,
    pending: Vec<Complex<f32>>,
    pending_timestamp: u64,
    reference_timestamp: u64,
    since_reference: u64,
    completed: VecDeque<ComplexSamples>,
}

impl SampleAssembler {
    pub fn new(buffer_len: usize, sample_rate: f64) -> Self {
        let buffer_len = buffer_len.max(1);
        Self {
            buffer_len,
            sample_rate,
            pending: Vec::with_capacity(buffer_len),
            pending_timestamp: 0,
            reference_timestamp: 0,
            since_reference: 0,
            completed: VecDeque::new(),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn current_timestamp(&self) -> u64 {
        if self.sample_rate <= 0.0 {
            return self.reference_timestamp;
        }
        self.reference_timestamp + (self.since_reference as f64 * 1000.0 / self.sample_rate) as u64
    }

    /// Append one sample taken from a frame stamped `upstream_timestamp`.
    pub fn push(&mut self, sample: Complex<f32>, upstream_timestamp: u64) {
        if upstream_timestamp != self.reference_timestamp {
            self.reference_timestamp = upstream_timestamp;
            self.since_reference = 0;
        }
        if self.pending.is_empty() {
            self.pending_timestamp = self.current_timestamp();
        }
        self.pending.push(sample);
        self.since_reference += 1;

        if self.pending.len() >= self.buffer_len {
            let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.buffer_len));
            self.completed
                .push_back(ComplexSamples::new(samples, self.pending_timestamp));
        }
    }

    /// Completed buffers in production order.
    pub fn take_completed(&mut self) -> Vec<ComplexSamples> {
        self.completed.drain(..).collect()
    }

    /// Emit the partially filled buffer, if any.
    pub fn flush(&mut self) -> Option<ComplexSamples> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.pending);
        Some(ComplexSamples::new(samples, self.pending_timestamp))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Output processors
// ---------------------------------------------------------------------------

struct ProcessorCore {
    indexes: Vec<usize>,
    frequency_offset: i64,
    oscillator: Oscillator,
    queue: OverflowQueue<ChannelResultsFrame>,
    scratch: Vec<Complex<f32>>,
    timestamps: Vec<u64>,
}

impl ProcessorCore {
    fn new(name: &str, channel_sample_rate: f64, indexes: Vec<usize>) -> Self {
        let limit = queue_limit(channel_sample_rate);
        Self {
            indexes,
            frequency_offset: 0,
            oscillator: Oscillator::new(0.0, channel_sample_rate),
            queue: OverflowQueue::new(name, limit, limit / 2),
            scratch: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    fn set_frequency_offset(&mut self, offset: i64) {
        self.frequency_offset = offset;
        self.oscillator.set_frequency(offset as f64);
    }

    fn emit(&mut self, assembler: &mut SampleAssembler) -> usize {
        self.oscillator.mix(&mut self.scratch);
        for (&sample, &timestamp) in self.scratch.iter().zip(&self.timestamps) {
            assembler.push(sample, timestamp);
        }
        let count = self.scratch.len();
        self.scratch.clear();
        self.timestamps.clear();
        count
    }
}

/// Extracts a single bin and mixes it to baseband.
pub struct OneBinProcessor {
    core: ProcessorCore,
}

/// Recombines two adjacent bins and mixes the composite to baseband.
pub struct TwoBinProcessor {
    core: ProcessorCore,
    synthesizer: TwoChannelSynthesizer,
    taps: Arc<[f32]>,
}

/// Output stage of one channel source.
pub enum ChannelOutputProcessor {
    OneBin(OneBinProcessor),
    TwoBin(TwoBinProcessor),
}

impl ChannelOutputProcessor {
    pub fn one_bin(channel_sample_rate: f64, index: usize) -> Self {
        Self::OneBin(OneBinProcessor {
            core: ProcessorCore::new("one bin output", channel_sample_rate, vec![index]),
        })
    }

    pub fn two_bin(
        channel_sample_rate: f64,
        indexes: [usize; 2],
        synthesis_filter: Arc<[f32]>,
    ) -> Self {
        Self::TwoBin(TwoBinProcessor {
            core: ProcessorCore::new("two bin output", channel_sample_rate, indexes.to_vec()),
            synthesizer: TwoChannelSynthesizer::new(&synthesis_filter),
            taps: synthesis_filter,
        })
    }

    /// Processor matching the number of `indexes`; two-bin processors take
    /// their synthesis filter from `filters`.
    pub fn for_indexes(
        indexes: &[usize],
        channel_sample_rate: f64,
        channel_bandwidth: f64,
        filters: &SynthesisFilterManager,
    ) -> Result<Self, AdmissionError> {
        match *indexes {
            [index] => Ok(Self::one_bin(channel_sample_rate, index)),
            [lower, upper] => {
                let taps = filters.filter(channel_sample_rate, channel_bandwidth, 2)?;
                Ok(Self::two_bin(channel_sample_rate, [lower, upper], taps))
            }
            _ => Err(ChannelIndexError::UnsupportedIndexCount(indexes.len()).into()),
        }
    }

    fn core(&self) -> &ProcessorCore {
        match self {
            Self::OneBin(p) => &p.core,
            Self::TwoBin(p) => &p.core,
        }
    }

    fn core_mut(&mut self) -> &mut ProcessorCore {
        match self {
            Self::OneBin(p) => &mut p.core,
            Self::TwoBin(p) => &mut p.core,
        }
    }

    /// Number of channelizer bins this processor consumes.
    pub fn input_channel_count(&self) -> usize {
        match self {
            Self::OneBin(_) => 1,
            Self::TwoBin(_) => 2,
        }
    }

    pub fn indexes(&self) -> &[usize] {
        &self.core().indexes
    }

    pub fn frequency_offset(&self) -> i64 {
        self.core().frequency_offset
    }

    /// Retarget to new bins. The count must match [`input_channel_count`](Self::input_channel_count).
    pub fn set_polyphase_channel_indices(&mut self, indexes: &[usize]) -> Result<(), ChannelIndexError> {
        if indexes.len() != self.input_channel_count() {
            return Err(ChannelIndexError::UnsupportedIndexCount(indexes.len()));
        }
        self.core_mut().indexes = indexes.to_vec();
        Ok(())
    }

    pub fn set_frequency_offset(&mut self, offset: i64) {
        self.core_mut().set_frequency_offset(offset);
    }

    /// Replace the synthesis filter. Ignored by one-bin processors and when
    /// `taps` match the installed filter, so the synthesizer keeps its state.
    pub fn set_synthesis_filter(&mut self, taps: Arc<[f32]>) {
        if let Self::TwoBin(p) = self {
            if Arc::ptr_eq(&p.taps, &taps) || p.taps[..] == taps[..] {
                return;
            }
            p.synthesizer.set_filter(&taps);
            p.taps = taps;
        }
    }

    pub fn set_overflow_listener(&self, listener: Option<OverflowListener>) {
        self.core().queue.set_overflow_listener(listener);
    }

    /// Queue frames for the next processing pass. Returns how many were accepted.
    pub fn receive_channel_results(&self, frames: &[ChannelResultsFrame]) -> usize {
        let queue = &self.core().queue;
        frames.iter().filter(|f| queue.offer((*f).clone())).count()
    }

    pub fn queued_frames(&self) -> usize {
        self.core().queue.len()
    }

    /// Extract, mix and assemble every queued frame. Returns samples produced.
    pub fn process_channel_results(&mut self, assembler: &mut SampleAssembler) -> usize {
        match self {
            Self::OneBin(p) => {
                let core = &mut p.core;
                let index = core.indexes[0];
                for frame in core.queue.drain(usize::MAX) {
                    core.scratch.push(frame.bin(index));
                    core.timestamps.push(frame.timestamp());
                }
                core.emit(assembler)
            }
            Self::TwoBin(p) => {
                let core = &mut p.core;
                let (lower, upper) = (core.indexes[0], core.indexes[1]);
                for frame in core.queue.drain(usize::MAX) {
                    core.scratch
                        .push(p.synthesizer.process(frame.bin(lower), frame.bin(upper)));
                    core.timestamps.push(frame.timestamp());
                }
                core.emit(assembler)
            }
        }
    }

    /// Release every queued frame.
    pub fn dispose(&mut self) {
        self.core().queue.clear();
    }
}
