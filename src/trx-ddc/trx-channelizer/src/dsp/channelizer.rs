// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! 2× oversampled (M/2) polyphase analysis filter bank.
//!
//! Every `M/2` complex input samples produce one frame holding a sample for
//! each of the `M` channels. Filtering runs synchronously with sample
//! arrival; the inverse FFT and the fan-out to registered channels run on a
//! scheduler tick.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::{debug, info, warn};
use trx_core::{ChannelId, InterleavedSamples};

use super::filter::channelizer_prototype;
use crate::buffer::{BufferPool, ContinuousBufferProcessor, PooledBuffer};
use crate::error::ChannelizerError;
use crate::scheduler::Scheduler;

/// Interval of the IFFT / dispatch tick.
pub const DISPATCH_INTERVAL: Duration = Duration::from_millis(5);

/// One sample per channel, in bin order, produced by one filter block.
#[derive(Debug)]
pub struct ChannelResults {
    samples: PooledBuffer<Complex<f32>>,
    timestamp: u64,
}

impl ChannelResults {
    pub fn new(samples: PooledBuffer<Complex<f32>>, timestamp: u64) -> Self {
        Self { samples, timestamp }
    }

    pub fn samples(&self) -> &[Complex<f32>] {
        &self.samples
    }

    /// Sample of channel `index`, or zero when out of range.
    pub fn bin(&self, index: usize) -> Complex<f32> {
        self.samples.get(index).copied().unwrap_or_default()
    }

    /// Capture time of the block in milliseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Channel results shared by every registered channel. The pooled storage is
/// recycled once the last holder drops it.
pub type ChannelResultsFrame = Arc<ChannelResults>;

/// Consumer of channelizer output.
pub trait ChannelResultsListener: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    /// Accept a batch of frames in production order.
    fn receive_channel_results(&self, frames: &[ChannelResultsFrame]) -> Result<(), String>;
}

type Listeners = Arc<RwLock<Vec<Arc<dyn ChannelResultsListener>>>>;

/// Map that reorders the accumulator for the given block phase.
///
/// `processed[x] = accumulator[map[x]]`. Both maps reverse the order of the
/// complex samples within each half; the middle map also swaps the halves.
fn block_map(channel_count: usize, top: bool) -> Vec<usize> {
    let mut map = vec![0; channel_count * 2];
    let block_size = channel_count / 2;
    let offset = 2 * block_size;

    for channel in 0..block_size {
        let new_index = 2 * channel;
        let original_index = 2 * (block_size - channel - 1);
        let (low, high) = if top { (0, offset) } else { (offset, 0) };

        map[low + original_index] = new_index;
        map[low + original_index + 1] = new_index + 1;
        map[high + original_index] = offset + new_index;
        map[high + original_index + 1] = offset + new_index + 1;
    }
    map
}

/// Interleaved-I/Q copy of the prototype, padded to `2 × M × taps` and
/// reversed within each block of `M` floats.
fn aligned_filter(coefficients: &[f32], channel_count: usize, taps_per_channel: usize) -> Vec<f32> {
    let mut filter = vec![0.0; channel_count * taps_per_channel * 2];
    for (i, &coefficient) in coefficients.iter().enumerate() {
        filter[2 * i] = coefficient;
        filter[2 * i + 1] = coefficient;
    }
    for block in filter.chunks_mut(channel_count) {
        block.reverse();
    }
    filter
}

pub struct PolyphaseChannelizer {
    sample_rate: f64,
    channel_count: usize,
    taps_per_channel: usize,
    /// Floats per block (`M` floats = `M/2` complex samples).
    samples_per_block: usize,
    samples: Vec<f32>,
    filter: Vec<f32>,
    accumulator: Vec<f32>,
    top_block_map: Vec<usize>,
    middle_block_map: Vec<usize>,
    top_block: bool,
    pointer: usize,
    processed_blocks: u64,
    pool: BufferPool<Complex<f32>>,
    dispatcher: ContinuousBufferProcessor<ChannelResults>,
    listeners: Listeners,
}

impl PolyphaseChannelizer {
    /// Channelizer with a Blackman-Harris prototype of
    /// `channel_count × taps_per_channel` taps.
    pub fn new(
        sample_rate: f64,
        channel_count: usize,
        taps_per_channel: usize,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ChannelizerError> {
        if channel_count < 2 || channel_count % 2 != 0 {
            return Err(ChannelizerError::OddChannelCount(channel_count));
        }
        let taps = channelizer_prototype(channel_count, taps_per_channel)?;
        Self::with_taps(&taps, sample_rate, channel_count, scheduler)
    }

    /// Channelizer around an existing prototype filter.
    pub fn with_taps(
        taps: &[f32],
        sample_rate: f64,
        channel_count: usize,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ChannelizerError> {
        if channel_count < 2 || channel_count % 2 != 0 {
            return Err(ChannelizerError::OddChannelCount(channel_count));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(ChannelizerError::InvalidSampleRate(sample_rate));
        }
        if taps.is_empty() {
            return Err(crate::error::FilterDesignError::NoTaps.into());
        }

        let taps_per_channel = taps.len().div_ceil(channel_count);
        let sub_channel_count = channel_count * 2;
        let buffer_length = sub_channel_count * taps_per_channel;

        // Half a second of frames before the dispatcher sheds load.
        let frames_per_second = sample_rate / (channel_count / 2) as f64;
        let maximum_queued = ((frames_per_second / 2.0) as usize).max(64);

        let pool = BufferPool::new(maximum_queued);
        let dispatcher = ContinuousBufferProcessor::new(
            "polyphase ifft dispatcher",
            scheduler,
            DISPATCH_INTERVAL,
            maximum_queued,
            maximum_queued / 2,
        );
        let listeners: Listeners = Arc::new(RwLock::new(Vec::new()));
        dispatcher.set_listener(Some(ifft_dispatch(channel_count, listeners.clone())));

        info!(
            "Polyphase channelizer: {:.1} Hz sample rate, {} channels at {:.1} Hz, {} taps per channel",
            sample_rate,
            channel_count,
            sample_rate / channel_count as f64,
            taps_per_channel
        );

        Ok(Self {
            sample_rate,
            channel_count,
            taps_per_channel,
            samples_per_block: channel_count,
            samples: vec![0.0; buffer_length],
            filter: aligned_filter(taps, channel_count, taps_per_channel),
            accumulator: vec![0.0; sub_channel_count],
            top_block_map: block_map(channel_count, true),
            middle_block_map: block_map(channel_count, false),
            top_block: true,
            pointer: 0,
            processed_blocks: 0,
            pool,
            dispatcher,
            listeners,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn taps_per_channel(&self) -> usize {
        self.taps_per_channel
    }

    /// Sample rate of each channel output (2 × channel bandwidth).
    pub fn channel_sample_rate(&self) -> f64 {
        self.sample_rate / (self.channel_count / 2) as f64
    }

    pub fn processed_block_count(&self) -> u64 {
        self.processed_blocks
    }

    /// Whether the next completed block uses the top-block map.
    pub fn next_block_is_top(&self) -> bool {
        self.top_block
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }

    pub fn queued_frames(&self) -> usize {
        self.dispatcher.queued()
    }

    pub fn start(&self) {
        self.dispatcher.start();
    }

    /// Stop dispatching and drop any frames not yet dispatched.
    pub fn stop(&self) {
        self.dispatcher.stop();
    }

    /// Run the IFFT / dispatch stage once on the calling thread.
    pub fn dispatch_pending(&self) {
        self.dispatcher.flush();
    }

    pub fn set_overflow_listener(&self, listener: Option<crate::buffer::OverflowListener>) {
        self.dispatcher.set_overflow_listener(listener);
    }

    pub fn add_channel(&self, listener: Arc<dyn ChannelResultsListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            let id = listener.channel_id();
            if !listeners.iter().any(|l| l.channel_id() == id) {
                listeners.push(listener);
            }
        }
    }

    /// Returns `true` when a channel with `id` was registered.
    pub fn remove_channel(&self, id: ChannelId) -> bool {
        match self.listeners.write() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|l| l.channel_id() != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn registered_channel_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Filter a wideband buffer, queueing one frame per completed block.
    pub fn receive(&mut self, buffer: &InterleavedSamples) {
        let samples = &buffer.samples;
        let mut consumed = 0;

        while consumed < samples.len() {
            let to_copy = (self.samples_per_block - self.pointer).min(samples.len() - consumed);
            self.samples[self.pointer..self.pointer + to_copy]
                .copy_from_slice(&samples[consumed..consumed + to_copy]);
            self.pointer += to_copy;
            consumed += to_copy;

            if self.pointer >= self.samples_per_block {
                let offset_ms = (consumed / 2) as f64 * 1000.0 / self.sample_rate;
                let frame = self.process_block(buffer.timestamp + offset_ms as u64);
                if !self.dispatcher.receive(frame) {
                    debug!("channel results frame dropped while dispatcher is in overflow");
                }

                // Right-shift the buffer one block to make room for the next.
                let len = self.samples.len();
                self.samples
                    .copy_within(0..len - self.samples_per_block, self.samples_per_block);
                self.pointer = 0;
            }
        }
    }

    fn process_block(&mut self, timestamp: u64) -> ChannelResults {
        let sub_channel_count = self.accumulator.len();
        self.accumulator.fill(0.0);

        for (samples, filter) in self
            .samples
            .chunks_exact(sub_channel_count)
            .zip(self.filter.chunks_exact(sub_channel_count))
        {
            for ((acc, &sample), &tap) in self.accumulator.iter_mut().zip(samples).zip(filter) {
                *acc += sample * tap;
            }
        }

        let map = if self.top_block {
            &self.top_block_map
        } else {
            &self.middle_block_map
        };
        self.top_block = !self.top_block;
        self.processed_blocks += 1;

        let mut frame = self.pool.acquire(self.channel_count);
        for (i, sample) in frame.iter_mut().enumerate() {
            *sample = Complex::new(
                self.accumulator[map[2 * i]],
                self.accumulator[map[2 * i + 1]],
            );
        }
        ChannelResults::new(frame, timestamp)
    }
}

/// Dispatcher stage: rotate every frame into channel order with an unscaled
/// inverse FFT, then hand the batch to each registered channel.
fn ifft_dispatch(
    channel_count: usize,
    listeners: Listeners,
) -> crate::buffer::BatchListener<ChannelResults> {
    let ifft: Arc<dyn Fft<f32>> = FftPlanner::new().plan_fft_inverse(channel_count);
    Arc::new(move |batch: Vec<ChannelResults>| {
        let frames: Vec<ChannelResultsFrame> = batch
            .into_iter()
            .map(|mut results| {
                ifft.process(&mut results.samples);
                Arc::new(results)
            })
            .collect();

        let snapshot = listeners.read().map(|l| l.clone()).unwrap_or_default();
        for listener in snapshot {
            if let Err(e) = listener.receive_channel_results(&frames) {
                warn!(
                    "Error dispatching channel results to {}: {}",
                    listener.channel_id(),
                    e
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use std::f32::consts::PI;
    use std::sync::Mutex;

    struct Collector {
        id: ChannelId,
        frames: Mutex<Vec<ChannelResultsFrame>>,
        fail: bool,
    }

    impl Collector {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id: ChannelId::new(),
                frames: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    impl ChannelResultsListener for Collector {
        fn channel_id(&self) -> ChannelId {
            self.id
        }

        fn receive_channel_results(&self, frames: &[ChannelResultsFrame]) -> Result<(), String> {
            if self.fail {
                return Err("rejected".to_string());
            }
            self.frames.lock().unwrap().extend(frames.iter().cloned());
            Ok(())
        }
    }

    fn channelizer(channel_count: usize) -> PolyphaseChannelizer {
        PolyphaseChannelizer::new(
            channel_count as f64 * 25_000.0,
            channel_count,
            16,
            Arc::new(ManualScheduler::new()),
        )
        .unwrap()
    }

    fn tone(cycles_per_sample: f32, len: usize) -> InterleavedSamples {
        let samples: Vec<Complex<f32>> = (0..len)
            .map(|n| Complex::from_polar(1.0, 2.0 * PI * cycles_per_sample * n as f32))
            .collect();
        InterleavedSamples::from_complex(&samples, 0)
    }

    #[test]
    fn test_rejects_odd_channel_count() {
        let err = PolyphaseChannelizer::new(1e6, 7, 16, Arc::new(ManualScheduler::new()));
        assert!(matches!(err, Err(ChannelizerError::OddChannelCount(7))));
    }

    #[test]
    fn test_sizing() {
        let ch = channelizer(8);
        assert_eq!(ch.taps_per_channel(), 16);
        assert_eq!(ch.channel_sample_rate(), 50_000.0);

        let taps = vec![0.1; 17];
        let padded =
            PolyphaseChannelizer::with_taps(&taps, 200_000.0, 8, Arc::new(ManualScheduler::new()))
                .unwrap();
        assert_eq!(padded.taps_per_channel(), 3);
    }

    #[test]
    fn test_block_maps() {
        assert_eq!(block_map(4, true), vec![2, 3, 0, 1, 6, 7, 4, 5]);
        assert_eq!(block_map(4, false), vec![6, 7, 4, 5, 2, 3, 0, 1]);
    }

    #[test]
    fn test_aligned_filter_duplicates_and_reverses() {
        let filter = aligned_filter(&[1.0, 2.0, 3.0, 4.0], 4, 1);
        assert_eq!(filter, vec![2.0, 2.0, 1.0, 1.0, 4.0, 4.0, 3.0, 3.0]);
    }

    #[test]
    fn test_one_cycle_per_full_block() {
        let mut ch = channelizer(8);
        // 3 complex samples: less than one block of 4.
        ch.receive(&InterleavedSamples::new(vec![0.0; 6], 0));
        assert_eq!(ch.processed_block_count(), 0);
        assert_eq!(ch.queued_frames(), 0);
        assert!(ch.next_block_is_top());

        ch.receive(&InterleavedSamples::new(vec![0.0; 2], 0));
        assert_eq!(ch.processed_block_count(), 1);
        assert!(!ch.next_block_is_top());

        ch.receive(&InterleavedSamples::new(vec![0.0; 16], 0));
        assert_eq!(ch.processed_block_count(), 3);
        assert!(!ch.next_block_is_top());
        assert_eq!(ch.queued_frames(), 3);
    }

    #[test]
    fn test_tone_lands_in_its_bin() {
        let channel_count = 8;
        for bin in [0usize, 1, 3, 6] {
            let mut ch = channelizer(channel_count);
            let collector = Collector::new(false);
            ch.add_channel(collector.clone());

            let signed_bin = if bin >= channel_count / 2 {
                bin as f32 - channel_count as f32
            } else {
                bin as f32
            };
            ch.receive(&tone(signed_bin / channel_count as f32, 400));
            ch.dispatch_pending();

            let frames = collector.frames.lock().unwrap();
            assert_eq!(frames.len(), 100);
            for frame in frames.iter().skip(90) {
                for index in 0..channel_count {
                    let magnitude = frame.bin(index).norm();
                    if index == bin {
                        assert!(magnitude > 0.95, "bin {} magnitude {}", index, magnitude);
                    } else {
                        assert!(magnitude < 0.05, "leak into bin {}: {}", index, magnitude);
                    }
                }
            }
        }
    }

    #[test]
    fn test_dispatch_failure_does_not_stop_other_channels() {
        let mut ch = channelizer(8);
        let failing = Collector::new(true);
        let healthy = Collector::new(false);
        ch.add_channel(failing.clone());
        ch.add_channel(healthy.clone());
        assert_eq!(ch.registered_channel_count(), 2);

        ch.receive(&InterleavedSamples::new(vec![0.0; 16], 5));
        ch.dispatch_pending();
        assert_eq!(healthy.frames.lock().unwrap().len(), 2);

        assert!(ch.remove_channel(failing.channel_id()));
        assert!(!ch.remove_channel(failing.channel_id()));
        assert_eq!(ch.registered_channel_count(), 1);
    }

    #[test]
    fn test_frames_return_to_pool_after_all_channels_release() {
        let mut ch = channelizer(8);
        let a = Collector::new(false);
        let b = Collector::new(false);
        ch.add_channel(a.clone());
        ch.add_channel(b.clone());
        ch.receive(&InterleavedSamples::new(vec![0.0; 8], 0));
        ch.dispatch_pending();
        assert_eq!(ch.pool.recycled(), 0);

        a.frames.lock().unwrap().clear();
        assert_eq!(ch.pool.recycled(), 0);
        b.frames.lock().unwrap().clear();
        assert_eq!(ch.pool.recycled(), 1);
    }

    #[test]
    fn test_frame_timestamps_advance_with_samples() {
        let mut ch = channelizer(8);
        let collector = Collector::new(false);
        ch.add_channel(collector.clone());
        // 200 kS/s: 400 complex samples span 2 ms.
        ch.receive(&InterleavedSamples::new(vec![0.0; 800], 1_000));
        ch.dispatch_pending();
        let frames = collector.frames.lock().unwrap();
        assert_eq!(frames.first().map(|f| f.timestamp()), Some(1_000));
        assert_eq!(frames.last().map(|f| f.timestamp()), Some(1_002));
    }

    #[test]
    fn test_dispatcher_ticks_every_five_milliseconds() {
        let scheduler = Arc::new(ManualScheduler::new());
        let mut ch = PolyphaseChannelizer::new(200_000.0, 8, 16, scheduler.clone()).unwrap();
        let collector = Collector::new(false);
        ch.add_channel(collector.clone());
        ch.start();
        assert_eq!(scheduler.task_names(), vec!["polyphase ifft dispatcher".to_string()]);

        // First tick at t=0, the next one 5 ms later.
        assert_eq!(scheduler.advance(Duration::from_millis(4)), 1);
        ch.receive(&InterleavedSamples::new(vec![0.0; 8], 0));
        assert_eq!(ch.queued_frames(), 1);
        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(ch.queued_frames(), 0);
        assert_eq!(collector.frames.lock().unwrap().len(), 1);
        assert_eq!(scheduler.advance(Duration::from_millis(4)), 0);
        ch.stop();
    }

    #[test]
    fn test_stop_discards_queued_frames() {
        let mut ch = channelizer(8);
        ch.start();
        assert!(ch.is_running());
        ch.receive(&InterleavedSamples::new(vec![0.0; 16], 0));
        ch.stop();
        assert!(!ch.is_running());
        assert_eq!(ch.queued_frames(), 0);
    }
}
