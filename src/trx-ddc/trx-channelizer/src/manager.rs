// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Channel manager: one channelizer shared by every channel source.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use trx_core::{
    ChannelId, InterleavedSamples, ListenerId, SourceEvent, SourceEventBroadcaster,
    SourceEventListener, TunerChannel,
};

use crate::buffer::ContinuousBufferProcessor;
use crate::dsp::calculator::{default_channel_count, ChannelCalculator, DEFAULT_OVERSAMPLING};
use crate::dsp::channelizer::PolyphaseChannelizer;
use crate::dsp::filter::SYNTHESIS_TAPS_PER_CHANNEL;
use crate::dsp::synthesis::SynthesisFilterManager;
use crate::error::{AdmissionError, ChannelizerError};
use crate::scheduler::Scheduler;
use crate::source::PolyphaseChannelSource;

/// Interval at which queued wideband buffers are fed to the channelizer.
pub const BUFFER_INTERVAL: Duration = Duration::from_millis(20);

const BUFFER_QUEUE_MAXIMUM: usize = 500;
const BUFFER_QUEUE_RESET: usize = 100;

/// Channelizer geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelizerSettings {
    /// Prototype filter taps per channel.
    pub taps_per_channel: usize,
    /// Channel count; derived from the sample rate when `None`.
    pub channel_count: Option<usize>,
}

impl Default for ChannelizerSettings {
    fn default() -> Self {
        Self {
            taps_per_channel: SYNTHESIS_TAPS_PER_CHANNEL,
            channel_count: None,
        }
    }
}

impl ChannelizerSettings {
    fn channel_count_for(&self, sample_rate: f64) -> usize {
        self.channel_count
            .unwrap_or_else(|| default_channel_count(sample_rate))
    }
}

/// Serializable view of the manager and its channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub sample_rate: f64,
    pub center_frequency: i64,
    pub channel_count: usize,
    pub channel_bandwidth: f64,
    pub channel_sample_rate: f64,
    pub running: bool,
    pub active_channels: usize,
    pub channels: Vec<ChannelSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub id: String,
    pub frequency: i64,
    pub bandwidth: i64,
    pub indexes: Vec<usize>,
    pub index_center_frequency: i64,
    pub frequency_offset: i64,
    pub running: bool,
}

impl ChannelSnapshot {
    fn of(source: &PolyphaseChannelSource) -> Self {
        let channel = source.tuner_channel();
        Self {
            id: source.id().to_string(),
            frequency: channel.frequency(),
            bandwidth: channel.bandwidth(),
            indexes: source.output_indexes(),
            index_center_frequency: source.index_center_frequency(),
            frequency_offset: source.frequency_offset(),
            running: source.is_running(),
        }
    }
}

struct ManagerInner {
    calculator: ChannelCalculator,
    channelizer: PolyphaseChannelizer,
    /// Every admitted, not yet disposed source.
    sources: Vec<Arc<PolyphaseChannelSource>>,
    /// Sources currently registered with the channelizer.
    active: Vec<ChannelId>,
    running: bool,
    refresh_pending: bool,
}

impl ManagerInner {
    fn source(&self, id: ChannelId) -> Option<Arc<PolyphaseChannelSource>> {
        self.sources.iter().find(|s| s.id() == id).cloned()
    }

    /// Re-derive every source's output processor from the calculator.
    /// Consumers are not notified here; see [`Refresh::finish`].
    fn refresh_output_processors(&mut self, filters: &SynthesisFilterManager) -> Refresh {
        self.refresh_pending = false;
        let mut refresh = Refresh::default();
        for source in &self.sources {
            match source.retarget_output_processor(&self.calculator, filters) {
                Ok(()) => refresh.updated.push(source.clone()),
                Err(e) => refresh.failed.push((source.clone(), e)),
            }
        }
        for (source, _) in &refresh.failed {
            self.channelizer.remove_channel(source.id());
            self.active.retain(|id| *id != source.id());
        }
        refresh
    }
}

/// Outcome of an output processor refresh, applied after the manager lock
/// is released so consumer listeners may call back into the manager.
#[derive(Default)]
struct Refresh {
    updated: Vec<Arc<PolyphaseChannelSource>>,
    /// Sources that can no longer be served.
    failed: Vec<(Arc<PolyphaseChannelSource>, AdmissionError)>,
}

impl Refresh {
    fn finish(self, manager: &PolyphaseChannelManager) {
        for source in &self.updated {
            source.announce_correction_reset();
        }
        manager.stop_failed(self.failed);
    }
}

/// Owns the calculator / channelizer pair and hands out channel sources.
///
/// Wideband buffers arrive on [`receive`](Self::receive), typically from a
/// producer thread, and are fed into the channelizer on scheduler ticks. The
/// channelizer only runs while at least one channel source is started.
pub struct PolyphaseChannelManager {
    inner: Mutex<ManagerInner>,
    filters: SynthesisFilterManager,
    buffers: ContinuousBufferProcessor<InterleavedSamples>,
    events: Arc<SourceEventBroadcaster>,
    source_requests: Arc<dyn SourceEventListener>,
    scheduler: Arc<dyn Scheduler>,
    settings: ChannelizerSettings,
    error_message: Mutex<Option<String>>,
}

impl PolyphaseChannelManager {
    pub fn new(
        center_frequency: i64,
        sample_rate: f64,
        settings: ChannelizerSettings,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, ChannelizerError> {
        let channel_count = settings.channel_count_for(sample_rate);
        let calculator = ChannelCalculator::new(
            sample_rate,
            channel_count,
            center_frequency,
            DEFAULT_OVERSAMPLING,
        )?;
        let channelizer = PolyphaseChannelizer::new(
            sample_rate,
            channel_count,
            settings.taps_per_channel,
            scheduler.clone(),
        )?;

        let events = Arc::new(SourceEventBroadcaster::new());
        let overflow_events = events.clone();
        channelizer.set_overflow_listener(Some(Arc::new(move |overflow: bool| {
            overflow_events.broadcast(&SourceEvent::SourceOverflow(overflow));
        })));
        info!("{}", calculator);

        let manager = Arc::new_cyclic(|weak: &Weak<Self>| {
            let buffers = ContinuousBufferProcessor::new(
                "polyphase channel manager",
                scheduler.clone(),
                BUFFER_INTERVAL,
                BUFFER_QUEUE_MAXIMUM,
                BUFFER_QUEUE_RESET,
            );
            let manager = weak.clone();
            buffers.set_listener(Some(Arc::new(move |batch: Vec<InterleavedSamples>| {
                if let Some(manager) = manager.upgrade() {
                    manager.process_buffers(batch);
                }
            })));
            let overflow_events = events.clone();
            buffers.set_overflow_listener(Some(Arc::new(move |overflow: bool| {
                overflow_events.broadcast(&SourceEvent::SourceOverflow(overflow));
            })));

            let manager = weak.clone();
            let source_requests: Arc<dyn SourceEventListener> =
                Arc::new(move |event: &SourceEvent| {
                    if let Some(manager) = manager.upgrade() {
                        manager.handle_source_request(event);
                    }
                });

            Self {
                inner: Mutex::new(ManagerInner {
                    calculator,
                    channelizer,
                    sources: Vec::new(),
                    active: Vec::new(),
                    running: true,
                    refresh_pending: false,
                }),
                filters: SynthesisFilterManager::new(),
                buffers,
                events,
                source_requests,
                scheduler,
                settings,
                error_message: Mutex::new(None),
            }
        });
        Ok(manager)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ManagerInner>, AdmissionError> {
        self.inner.lock().map_err(|_| AdmissionError::Stopped)
    }

    /// Admit a channel and return its source. The source does not stream
    /// until it is started.
    pub fn channel(
        &self,
        tuner_channel: TunerChannel,
    ) -> Result<Arc<PolyphaseChannelSource>, AdmissionError> {
        let mut inner = self.lock()?;
        if !inner.running {
            return Err(AdmissionError::Stopped);
        }
        let source = PolyphaseChannelSource::new(
            tuner_channel,
            &inner.calculator,
            &self.filters,
            self.source_requests.clone(),
            self.scheduler.clone(),
        )
        .inspect_err(|e| warn!("Cannot provide channel {}: {}", tuner_channel, e))?;
        inner.sources.push(source.clone());
        debug!("Admitted {} as {}", tuner_channel, source.id());
        Ok(source)
    }

    /// Handle a tuner notification.
    pub fn process_event(&self, event: &SourceEvent) -> Result<(), ChannelizerError> {
        match event {
            SourceEvent::FrequencyChange(frequency) => {
                if let Ok(mut inner) = self.inner.lock() {
                    inner.calculator.set_center_frequency(*frequency);
                    inner.refresh_pending = true;
                }
                Ok(())
            }
            SourceEvent::SampleRateChange(sample_rate) => self.set_sample_rate(*sample_rate),
            _ => Ok(()),
        }
    }

    fn set_sample_rate(&self, sample_rate: f64) -> Result<(), ChannelizerError> {
        let refresh = {
            let Ok(mut inner) = self.inner.lock() else {
                return Ok(());
            };
            let was_running = self.buffers.is_running();
            self.buffers.stop();
            inner.channelizer.stop();

            let channel_count = self.settings.channel_count_for(sample_rate);
            let mut calculator = inner.calculator.clone();
            let rebuilt = calculator
                .set_rates(sample_rate, channel_count)
                .and_then(|_| {
                    PolyphaseChannelizer::new(
                        sample_rate,
                        channel_count,
                        self.settings.taps_per_channel,
                        self.scheduler.clone(),
                    )
                });
            let channelizer = match rebuilt {
                Ok(channelizer) => channelizer,
                Err(e) => {
                    error!("Cannot rebuild channelizer for {:.1} Hz: {}", sample_rate, e);
                    if was_running {
                        inner.channelizer.start();
                        self.buffers.start();
                    }
                    return Err(e);
                }
            };
            let overflow_events = self.events.clone();
            channelizer.set_overflow_listener(Some(Arc::new(move |overflow: bool| {
                overflow_events.broadcast(&SourceEvent::SourceOverflow(overflow));
            })));
            inner.channelizer = channelizer;
            inner.calculator = calculator;
            info!("{}", inner.calculator);

            // Taps designed for the old channel rate are stale.
            self.filters.clear();
            let refresh = inner.refresh_output_processors(&self.filters);
            let active = inner.active.clone();
            for id in active {
                if let Some(source) = inner.source(id) {
                    inner.channelizer.add_channel(source);
                }
            }
            if was_running && !inner.active.is_empty() {
                inner.channelizer.start();
                self.buffers.start();
            }
            refresh
        };
        refresh.finish(self);
        Ok(())
    }

    fn stop_failed(&self, failed: Vec<(Arc<PolyphaseChannelSource>, AdmissionError)>) {
        if failed.is_empty() {
            return;
        }
        let active = self.active_channel_count();
        for (source, e) in failed {
            warn!("Stopping {}: {}", source.id(), e);
            source.set_error(&e.to_string());
            source.process_event(&SourceEvent::StopSampleStream);
        }
        if active == 0 {
            self.buffers.stop();
            if let Ok(inner) = self.inner.lock() {
                inner.channelizer.stop();
            }
        }
        self.events
            .broadcast(&SourceEvent::ChannelCountChange(active));
    }

    /// Queue a wideband buffer. Buffers are dropped while no channel is
    /// streaming or while the queue is in overflow.
    pub fn receive(&self, buffer: InterleavedSamples) -> bool {
        if !self.buffers.is_running() {
            return false;
        }
        self.buffers.receive(buffer)
    }

    fn process_buffers(&self, batch: Vec<InterleavedSamples>) {
        let refresh = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            let refresh = if inner.refresh_pending {
                Some(inner.refresh_output_processors(&self.filters))
            } else {
                None
            };
            for buffer in &batch {
                inner.channelizer.receive(buffer);
            }
            refresh
        };
        if let Some(refresh) = refresh {
            refresh.finish(self);
        }
    }

    fn handle_source_request(&self, event: &SourceEvent) {
        match event {
            SourceEvent::RequestStartSampleStream(id) => self.start_channel_source(*id),
            SourceEvent::RequestStopSampleStream(id) => self.stop_channel_source(*id),
            SourceEvent::RequestDispose(id) => self.dispose_channel_source(*id),
            SourceEvent::MeasuredFrequencyError(_) => self.events.broadcast(event),
            other => debug!("Ignoring channel request {:?}", other),
        }
    }

    fn start_channel_source(&self, id: ChannelId) {
        let (source, count) = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            let Some(source) = inner.source(id) else {
                warn!("Start requested for unknown channel {}", id);
                return;
            };
            if !inner.running {
                drop(inner);
                warn!("Refusing to start {}: channel manager is stopped", id);
                source.process_event(&SourceEvent::StopSampleStream);
                return;
            }
            if inner.active.contains(&id) {
                return;
            }
            if inner.active.is_empty() {
                inner.channelizer.start();
                self.buffers.start();
                info!("Channelizer started");
            }
            inner.channelizer.add_channel(source.clone());
            inner.active.push(id);
            (source, inner.active.len())
        };
        debug!("{} streaming, {} active channel(s)", source.id(), count);
        self.events
            .broadcast(&SourceEvent::ChannelCountChange(count));
    }

    fn stop_channel_source(&self, id: ChannelId) {
        let (source, count) = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if !inner.active.contains(&id) {
                return;
            }
            inner.channelizer.remove_channel(id);
            inner.active.retain(|active| *active != id);
            if inner.active.is_empty() {
                self.buffers.stop();
                inner.channelizer.stop();
                info!("Channelizer stopped");
            }
            (inner.source(id), inner.active.len())
        };
        if let Some(source) = source {
            source.process_event(&SourceEvent::StopSampleStream);
        }
        self.events
            .broadcast(&SourceEvent::ChannelCountChange(count));
    }

    fn dispose_channel_source(&self, id: ChannelId) {
        self.stop_channel_source(id);
        let source = match self.inner.lock() {
            Ok(mut inner) => {
                let source = inner.source(id);
                inner.sources.retain(|s| s.id() != id);
                source
            }
            Err(_) => None,
        };
        if let Some(source) = source {
            source.dispose();
        }
    }

    /// Refuse further admissions and stop every channel source.
    pub fn stop_all_channels(&self) {
        let sources = match self.inner.lock() {
            Ok(mut inner) => {
                inner.running = false;
                inner.sources.clone()
            }
            Err(_) => return,
        };
        for source in sources {
            source.stop();
        }
    }

    /// Put every channel source into an error state.
    pub fn set_error_message(&self, message: &str) {
        if let Ok(mut slot) = self.error_message.lock() {
            *slot = Some(message.to_string());
        }
        for source in self.sources() {
            source.set_error(message);
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.lock().ok().and_then(|m| m.clone())
    }

    fn sources(&self) -> Vec<Arc<PolyphaseChannelSource>> {
        self.inner
            .lock()
            .map(|inner| inner.sources.clone())
            .unwrap_or_default()
    }

    /// Channels of every admitted source.
    pub fn tuner_channels(&self) -> Vec<TunerChannel> {
        self.sources().iter().map(|s| s.tuner_channel()).collect()
    }

    pub fn tuner_channel_count(&self) -> usize {
        self.inner.lock().map(|i| i.sources.len()).unwrap_or(0)
    }

    /// Sources currently registered with the channelizer.
    pub fn active_channel_count(&self) -> usize {
        self.inner.lock().map(|i| i.active.len()).unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().map(|i| i.running).unwrap_or(false)
    }

    pub fn calculator(&self) -> Option<ChannelCalculator> {
        self.inner.lock().ok().map(|i| i.calculator.clone())
    }

    pub fn add_source_event_listener(&self, listener: Arc<dyn SourceEventListener>) -> ListenerId {
        self.events.register(listener)
    }

    pub fn remove_source_event_listener(&self, id: ListenerId) {
        self.events.unregister(id);
    }

    /// Multi-line summary: calculator geometry then one line per channel.
    pub fn state_description(&self) -> String {
        let Ok(inner) = self.inner.lock() else {
            return String::new();
        };
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Polyphase Channel Manager Providing Channels: {}",
            inner.sources.len()
        );
        let _ = writeln!(out, "{}", inner.calculator);
        for source in &inner.sources {
            let channel = source.tuner_channel();
            let _ = writeln!(
                out,
                "\t{} indexes {:?} index center {} requested center {} bandwidth {} mixer offset {}{}",
                source.id(),
                source.output_indexes(),
                source.index_center_frequency(),
                channel.frequency(),
                channel.bandwidth(),
                source.frequency_offset(),
                if source.is_running() { "" } else { " (stopped)" }
            );
        }
        out
    }

    pub fn snapshot(&self) -> Option<ManagerSnapshot> {
        let inner = self.inner.lock().ok()?;
        Some(ManagerSnapshot {
            sample_rate: inner.calculator.sample_rate(),
            center_frequency: inner.calculator.center_frequency(),
            channel_count: inner.calculator.channel_count(),
            channel_bandwidth: inner.calculator.channel_bandwidth(),
            channel_sample_rate: inner.calculator.channel_sample_rate(),
            running: inner.running,
            active_channels: inner.active.len(),
            channels: inner
                .sources
                .iter()
                .map(|s| ChannelSnapshot::of(s))
                .collect(),
        })
    }
}

impl SourceEventListener for PolyphaseChannelManager {
    fn on_source_event(&self, event: &SourceEvent) {
        if let Err(e) = self.process_event(event) {
            error!("Channel manager failed to apply {:?}: {}", event, e);
        }
    }
}
