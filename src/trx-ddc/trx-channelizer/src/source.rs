// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! A tuner channel served from polyphase channelizer bins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use trx_core::{
    ChannelId, ComplexSamples, ListenerId, SourceEvent, SourceEventBroadcaster,
    SourceEventListener, TunerChannel,
};

use crate::dsp::calculator::ChannelCalculator;
use crate::dsp::channelizer::{ChannelResultsFrame, ChannelResultsListener};
use crate::dsp::output::{ChannelOutputProcessor, SampleAssembler};
use crate::dsp::synthesis::SynthesisFilterManager;
use crate::error::AdmissionError;
use crate::scheduler::{ScheduledTask, Scheduler};

/// Interval at which queued frames are turned into output samples.
pub const OUTPUT_INTERVAL: Duration = Duration::from_millis(20);

/// Complex samples per emitted buffer.
pub const OUTPUT_BUFFER_LEN: usize = 2048;

const SAMPLE_CHANNEL_CAPACITY: usize = 64;

struct SourceState {
    processor: Option<ChannelOutputProcessor>,
    assembler: SampleAssembler,
    index_center_frequency: i64,
    frequency_correction: i64,
    channel_sample_rate: f64,
    tuner_center_frequency: i64,
    tuner_sample_rate: f64,
}

impl SourceState {
    fn frequency_offset(&self, tuner_channel: &TunerChannel) -> i64 {
        self.index_center_frequency - tuner_channel.frequency() + self.frequency_correction
    }
}

pub struct PolyphaseChannelSource {
    id: ChannelId,
    tuner_channel: TunerChannel,
    state: Mutex<SourceState>,
    sample_tx: broadcast::Sender<ComplexSamples>,
    consumer_events: Arc<SourceEventBroadcaster>,
    producer: Arc<dyn SourceEventListener>,
    scheduler: Arc<dyn Scheduler>,
    output_task: Mutex<Option<ScheduledTask>>,
    running: AtomicBool,
    error_message: RwLock<Option<String>>,
}

impl PolyphaseChannelSource {
    /// Build a source for `tuner_channel` with an output processor matching
    /// the channelizer's current geometry.
    ///
    /// `producer` receives this source's start / stop / dispose requests.
    pub fn new(
        tuner_channel: TunerChannel,
        calculator: &ChannelCalculator,
        filters: &SynthesisFilterManager,
        producer: Arc<dyn SourceEventListener>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, AdmissionError> {
        let (sample_tx, _) = broadcast::channel(SAMPLE_CHANNEL_CAPACITY);
        let channel_sample_rate = calculator.channel_sample_rate();
        let source = Arc::new(Self {
            id: ChannelId::new(),
            tuner_channel,
            state: Mutex::new(SourceState {
                processor: None,
                assembler: SampleAssembler::new(OUTPUT_BUFFER_LEN, channel_sample_rate),
                index_center_frequency: 0,
                frequency_correction: 0,
                channel_sample_rate,
                tuner_center_frequency: calculator.center_frequency(),
                tuner_sample_rate: calculator.sample_rate(),
            }),
            sample_tx,
            consumer_events: Arc::new(SourceEventBroadcaster::new()),
            producer,
            scheduler,
            output_task: Mutex::new(None),
            running: AtomicBool::new(false),
            error_message: RwLock::new(None),
        });
        source.retarget_output_processor(calculator, filters)?;
        Ok(source)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn tuner_channel(&self) -> TunerChannel {
        self.tuner_channel
    }

    /// Subscribe to the channel's baseband sample buffers.
    pub fn subscribe(&self) -> broadcast::Receiver<ComplexSamples> {
        self.sample_tx.subscribe()
    }

    /// Register a consumer for this channel's notifications.
    pub fn add_source_event_listener(&self, listener: Arc<dyn SourceEventListener>) -> ListenerId {
        self.consumer_events.register(listener)
    }

    pub fn remove_source_event_listener(&self, id: ListenerId) {
        self.consumer_events.unregister(id);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn with_state<R>(&self, f: impl FnOnce(&SourceState) -> R) -> Option<R> {
        self.state.lock().ok().map(|state| f(&state))
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.with_state(|s| s.channel_sample_rate).unwrap_or(0.0)
    }

    /// Center of the bins feeding this channel.
    pub fn index_center_frequency(&self) -> i64 {
        self.with_state(|s| s.index_center_frequency).unwrap_or(0)
    }

    pub fn frequency_correction(&self) -> i64 {
        self.with_state(|s| s.frequency_correction).unwrap_or(0)
    }

    /// Mixer offset: index center − requested center + correction.
    pub fn frequency_offset(&self) -> i64 {
        self.with_state(|s| s.frequency_offset(&self.tuner_channel))
            .unwrap_or(0)
    }

    pub fn output_indexes(&self) -> Vec<usize> {
        self.with_state(|s| {
            s.processor
                .as_ref()
                .map(|p| p.indexes().to_vec())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn input_channel_count(&self) -> usize {
        self.with_state(|s| s.processor.as_ref().map_or(0, |p| p.input_channel_count()))
            .unwrap_or(0)
    }

    pub fn tuner_center_frequency(&self) -> i64 {
        self.with_state(|s| s.tuner_center_frequency).unwrap_or(0)
    }

    pub fn tuner_sample_rate(&self) -> f64 {
        self.with_state(|s| s.tuner_sample_rate).unwrap_or(0.0)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().ok().and_then(|e| e.clone())
    }

    /// Ask the producer to start streaming and begin emitting samples.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let task = self.scheduler.schedule_at_fixed_rate(
            &format!("{} output", self.id),
            OUTPUT_INTERVAL,
            Box::new(move || {
                if let Some(source) = weak.upgrade() {
                    source.process_output();
                }
            }),
        );
        if let Ok(mut slot) = self.output_task.lock() {
            *slot = Some(task);
        }

        self.consumer_events.broadcast(&SourceEvent::StartSampleStream);
        debug!("{} requesting sample stream start", self.id);
        self.producer
            .on_source_event(&SourceEvent::RequestStartSampleStream(self.id));
    }

    /// Ask the producer to stop streaming.
    pub fn stop(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        debug!("{} requesting sample stream stop", self.id);
        self.producer
            .on_source_event(&SourceEvent::RequestStopSampleStream(self.id));
        self.halt();
    }

    fn halt(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let task = self.output_task.lock().ok().and_then(|mut t| t.take());
        drop(task);
        self.process_output();
    }

    /// Ask the producer to dispose of this source once it is stopped.
    pub fn request_dispose(&self) {
        self.producer
            .on_source_event(&SourceEvent::RequestDispose(self.id));
    }

    /// Release the output processor and every queued frame.
    pub fn dispose(&self) {
        self.halt();
        if let Ok(mut state) = self.state.lock() {
            if let Some(mut processor) = state.processor.take() {
                processor.dispose();
            }
        }
        self.consumer_events.clear();
        debug!("{} disposed", self.id);
    }

    /// Handle an event addressed to this source, either from the producer
    /// (stop notification, error) or from a consumer (measured frequency error).
    pub fn process_event(&self, event: &SourceEvent) {
        match event {
            SourceEvent::StopSampleStream => {
                self.halt();
                self.consumer_events.broadcast(event);
            }
            SourceEvent::Error(message) => self.set_error(message),
            SourceEvent::MeasuredFrequencyError(_) => self.producer.on_source_event(event),
            SourceEvent::FrequencyCorrectionChange(correction) => {
                self.set_channel_frequency_correction(*correction)
            }
            other => debug!("{} ignoring source event {:?}", self.id, other),
        }
    }

    /// Record an error and notify consumers.
    pub fn set_error(&self, message: &str) {
        if let Ok(mut slot) = self.error_message.write() {
            *slot = Some(message.to_string());
        }
        error!("{}: {}", self.id, message);
        self.consumer_events
            .broadcast(&SourceEvent::Error(message.to_string()));
    }

    /// Apply a frequency correction (Hz) on top of the bin offset.
    pub fn set_channel_frequency_correction(&self, correction: i64) {
        if let Ok(mut state) = self.state.lock() {
            state.frequency_correction = correction;
            let offset = state.frequency_offset(&self.tuner_channel);
            if let Some(processor) = state.processor.as_mut() {
                processor.set_frequency_offset(offset);
            }
        }
        self.consumer_events
            .broadcast(&SourceEvent::FrequencyCorrectionChange(correction));
    }

    /// Re-derive bins, composite center and mixer offset from `calculator`.
    ///
    /// The frequency correction is reset to zero. A processor with the same
    /// number of bins is retargeted in place; otherwise it is replaced and the
    /// old one drained into the output before being disposed.
    pub fn update_output_processor(
        &self,
        calculator: &ChannelCalculator,
        filters: &SynthesisFilterManager,
    ) -> Result<(), AdmissionError> {
        self.retarget_output_processor(calculator, filters)?;
        self.announce_correction_reset();
        Ok(())
    }

    /// Tell consumers the frequency correction went back to zero.
    pub(crate) fn announce_correction_reset(&self) {
        self.consumer_events
            .broadcast(&SourceEvent::FrequencyCorrectionChange(0));
    }

    /// [`update_output_processor`](Self::update_output_processor) without
    /// notifying consumers. Callers holding the manager lock use this and
    /// announce once the lock is released.
    pub(crate) fn retarget_output_processor(
        &self,
        calculator: &ChannelCalculator,
        filters: &SynthesisFilterManager,
    ) -> Result<(), AdmissionError> {
        let indexes = calculator.channel_indexes(&self.tuner_channel)?;
        let index_center_frequency = calculator.center_frequency_for_indexes(&indexes)?;
        let channel_sample_rate = calculator.channel_sample_rate();
        let channel_bandwidth = calculator.channel_bandwidth();

        let Ok(mut state) = self.state.lock() else {
            return Err(AdmissionError::Stopped);
        };
        state.index_center_frequency = index_center_frequency;
        state.frequency_correction = 0;
        state.tuner_center_frequency = calculator.center_frequency();
        state.tuner_sample_rate = calculator.sample_rate();
        let offset = state.frequency_offset(&self.tuner_channel);

        let same_shape = state
            .processor
            .as_ref()
            .is_some_and(|p| p.input_channel_count() == indexes.len())
            && state.channel_sample_rate == channel_sample_rate;

        if same_shape {
            if let Some(processor) = state.processor.as_mut() {
                processor.set_polyphase_channel_indices(&indexes)?;
                if indexes.len() > 1 {
                    let taps =
                        filters.filter(channel_sample_rate, channel_bandwidth, indexes.len())?;
                    processor.set_synthesis_filter(taps);
                }
                processor.set_frequency_offset(offset);
            }
        } else {
            let mut processor = ChannelOutputProcessor::for_indexes(
                &indexes,
                channel_sample_rate,
                channel_bandwidth,
                filters,
            )?;
            processor.set_frequency_offset(offset);
            let events = self.consumer_events.clone();
            processor.set_overflow_listener(Some(Arc::new(move |overflow: bool| {
                events.broadcast(&SourceEvent::SourceOverflow(overflow));
            })));

            let state = &mut *state;
            if let Some(mut previous) = state.processor.replace(processor) {
                previous.process_channel_results(&mut state.assembler);
                previous.dispose();
            }
            state.channel_sample_rate = channel_sample_rate;
            state.assembler.set_sample_rate(channel_sample_rate);
            info!(
                "{} output processor: {} bin(s) {:?}, offset {} Hz",
                self.id,
                indexes.len(),
                indexes,
                offset
            );
        }
        Ok(())
    }

    /// Turn queued frames into samples and publish completed buffers.
    pub fn process_output(&self) {
        let completed = match self.state.lock() {
            Ok(mut state) => {
                let state = &mut *state;
                if let Some(processor) = state.processor.as_mut() {
                    processor.process_channel_results(&mut state.assembler);
                }
                state.assembler.take_completed()
            }
            Err(_) => return,
        };
        for buffer in completed {
            // No subscribers is not an error.
            let _ = self.sample_tx.send(buffer);
        }
    }
}

impl ChannelResultsListener for PolyphaseChannelSource {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn receive_channel_results(&self, frames: &[ChannelResultsFrame]) -> Result<(), String> {
        let state = self
            .state
            .lock()
            .map_err(|_| format!("{} state lock poisoned", self.id))?;
        match state.processor.as_ref() {
            Some(processor) => {
                let accepted = processor.receive_channel_results(frames);
                if accepted < frames.len() {
                    warn!(
                        "{} dropped {} channel results frame(s)",
                        self.id,
                        frames.len() - accepted
                    );
                }
                Ok(())
            }
            None => Err(format!("{} has no output processor", self.id)),
        }
    }
}

impl std::fmt::Debug for PolyphaseChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolyphaseChannelSource")
            .field("id", &self.id)
            .field("tuner_channel", &self.tuner_channel)
            .field("running", &self.is_running())
            .finish()
    }
}
