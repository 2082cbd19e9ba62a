// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info};
use trx_core::{
    InterleavedSamples, ListenerId, SourceEvent, SourceEventBroadcaster, SourceEventListener,
    TunerChannel,
};

use super::placement::CenterFrequencyCalculator;
use super::search::{can_tune_set, search_center_frequency, SearchContext};
use super::{PlacementMode, TunerController};
use crate::error::{AdmissionError, ChannelizerError};
use crate::manager::{ChannelizerSettings, PolyphaseChannelManager};
use crate::scheduler::Scheduler;
use crate::source::PolyphaseChannelSource;

/// Decides whether a requested channel can be served, retunes the tuner when
/// the channel set needs a new center frequency and hands out channel sources.
pub struct PolyphaseChannelSourceManager {
    tuner: Arc<dyn TunerController>,
    manager: Arc<PolyphaseChannelManager>,
    placement: PlacementMode,
    events: SourceEventBroadcaster,
    admission: Mutex<()>,
    tuner_listener: ListenerId,
}

impl PolyphaseChannelSourceManager {
    pub fn new(
        tuner: Arc<dyn TunerController>,
        settings: ChannelizerSettings,
        placement: PlacementMode,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, ChannelizerError> {
        let manager = PolyphaseChannelManager::new(
            tuner.frequency(),
            tuner.sample_rate(),
            settings,
            scheduler,
        )?;
        let tuner_listener = tuner.add_listener(manager.clone());

        let source_manager = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            manager.add_source_event_listener(Arc::new(move |event: &SourceEvent| {
                if let Some(source_manager) = weak.upgrade() {
                    source_manager.process_manager_event(event);
                }
            }));
            Self {
                tuner,
                manager,
                placement,
                events: SourceEventBroadcaster::new(),
                admission: Mutex::new(()),
                tuner_listener,
            }
        });
        Ok(source_manager)
    }

    pub fn channel_manager(&self) -> &Arc<PolyphaseChannelManager> {
        &self.manager
    }

    pub fn placement_mode(&self) -> PlacementMode {
        self.placement
    }

    /// Channels of every admitted source.
    pub fn tuner_channels(&self) -> Vec<TunerChannel> {
        self.manager.tuner_channels()
    }

    pub fn tuner_channel_count(&self) -> usize {
        self.manager.tuner_channel_count()
    }

    /// Admit `tuner_channel`, retuning first when the channel set needs it.
    pub fn source(
        &self,
        tuner_channel: TunerChannel,
    ) -> Result<Arc<PolyphaseChannelSource>, AdmissionError> {
        let _admission = self.admission.lock().map_err(|_| AdmissionError::Stopped)?;
        let limits = self.tuner.limits();

        if !(self.tuner.can_tune(tuner_channel.min_frequency())
            && self.tuner.can_tune(tuner_channel.max_frequency()))
        {
            return Err(AdmissionError::NotTunable(tuner_channel));
        }

        let mut channels = self.manager.tuner_channels();
        channels.push(tuner_channel);
        channels.sort();
        if !can_tune_set(&channels, &limits) {
            return Err(AdmissionError::ChannelSetNotTunable);
        }

        let current = self.tuner.frequency();
        let updated = match self.placement {
            PlacementMode::BinAligned => {
                let channel_bandwidth = self
                    .manager
                    .calculator()
                    .map(|c| c.channel_bandwidth())
                    .ok_or(AdmissionError::Stopped)?;
                let (_, center) = search_center_frequency(&SearchContext {
                    channels: &channels,
                    limits: &limits,
                    channel_bandwidth,
                    current_center: current,
                })?;
                center
            }
            PlacementMode::Compact => {
                CenterFrequencyCalculator::new(limits).center_frequency(&channels)?
            }
        };

        if updated != current {
            self.tuner.set_frequency(updated).inspect_err(|e| {
                error!(
                    "Cannot retune to {} Hz for {}: {}",
                    updated, tuner_channel, e
                )
            })?;
            info!("Retuned {} Hz -> {} Hz for {}", current, updated, tuner_channel);
        }

        self.manager.channel(tuner_channel)
    }

    /// Stop a source and hand it back for disposal.
    pub fn release_source(&self, source: &PolyphaseChannelSource) {
        source.stop();
        source.request_dispose();
    }

    /// Feed a wideband buffer from the tuner.
    pub fn receive(&self, buffer: InterleavedSamples) -> bool {
        self.manager.receive(buffer)
    }

    pub fn add_source_event_listener(&self, listener: Arc<dyn SourceEventListener>) -> ListenerId {
        self.events.register(listener)
    }

    pub fn remove_source_event_listener(&self, id: ListenerId) {
        self.events.unregister(id);
    }

    fn process_manager_event(&self, event: &SourceEvent) {
        match event {
            SourceEvent::ChannelCountChange(count) => {
                self.events.broadcast(event);
                self.tuner.set_locked(*count > 0);
            }
            SourceEvent::MeasuredFrequencyError(_) | SourceEvent::SourceOverflow(_) => {
                self.events.broadcast(event)
            }
            other => debug!("Unrecognized source event {:?}", other),
        }
    }
}

impl Drop for PolyphaseChannelSourceManager {
    fn drop(&mut self) {
        self.tuner.remove_listener(self.tuner_listener);
        self.manager.stop_all_channels();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use crate::tuner::simulated::{SimulatedTuner, TestTone};
    use crate::tuner::TunerLimits;
    use crate::IqSource;
    use num_complex::Complex;

    struct Recorder {
        events: Mutex<Vec<SourceEvent>>,
    }

    impl SourceEventListener for Recorder {
        fn on_source_event(&self, event: &SourceEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn limits(unusable: i64) -> TunerLimits {
        TunerLimits {
            minimum_frequency: 24_000_000,
            maximum_frequency: 1_700_000_000,
            sample_rate: 1_000_000.0,
            usable_bandwidth_fraction: 0.9,
            unusable_center_half_width: unusable,
        }
    }

    fn setup(
        unusable: i64,
        placement: PlacementMode,
        tones: Vec<TestTone>,
    ) -> (
        Arc<SimulatedTuner>,
        Arc<ManualScheduler>,
        Arc<PolyphaseChannelSourceManager>,
    ) {
        let tuner = Arc::new(SimulatedTuner::new(100_000_000, limits(unusable), tones).unwrap());
        let scheduler = Arc::new(ManualScheduler::new());
        let manager = PolyphaseChannelSourceManager::new(
            tuner.clone(),
            ChannelizerSettings::default(),
            placement,
            scheduler.clone(),
        )
        .unwrap();
        (tuner, scheduler, manager)
    }

    fn ch(frequency: i64) -> TunerChannel {
        TunerChannel::new(frequency, 12_500).unwrap()
    }

    #[test]
    fn test_untunable_channel_is_rejected() {
        let (tuner, _, sm) = setup(0, PlacementMode::BinAligned, Vec::new());
        assert_eq!(
            sm.source(ch(10_000_000)).unwrap_err(),
            AdmissionError::NotTunable(ch(10_000_000))
        );
        assert_eq!(tuner.frequency(), 100_000_000);
    }

    #[test]
    fn test_admission_reuses_aligned_center() {
        let (tuner, _, sm) = setup(0, PlacementMode::BinAligned, Vec::new());
        let source = sm.source(ch(100_100_000)).unwrap();
        assert_eq!(tuner.frequency(), 100_000_000);
        assert_eq!(source.output_indexes(), vec![4]);
        assert_eq!(sm.tuner_channel_count(), 1);
    }

    #[test]
    fn test_admission_retunes_when_needed() {
        let (tuner, _, sm) = setup(0, PlacementMode::BinAligned, Vec::new());
        let source = sm.source(ch(150_000_000)).unwrap();
        assert_ne!(tuner.frequency(), 100_000_000);
        let center = tuner.frequency();
        assert!(sm.channel_manager().calculator().unwrap().center_frequency() == center);
        assert!(source.tuner_center_frequency() == center);

        // A second channel far away does not fit the band.
        assert_eq!(
            sm.source(ch(152_000_000)).unwrap_err(),
            AdmissionError::ChannelSetNotTunable
        );
        assert_eq!(tuner.frequency(), center);
    }

    #[test]
    fn test_compact_placement_avoids_dc_region() {
        let (tuner, _, sm) = setup(10_000, PlacementMode::Compact, Vec::new());
        let channel = ch(100_000_000);
        sm.source(channel).unwrap();
        let center = tuner.frequency();
        assert!(!channel.overlaps(center - 10_000, center + 10_000));
    }

    #[test]
    fn test_channel_count_locks_tuner() {
        let (tuner, _, sm) = setup(0, PlacementMode::BinAligned, Vec::new());
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        sm.add_source_event_listener(recorder.clone());

        let source = sm.source(ch(100_100_000)).unwrap();
        source.start();
        assert!(tuner.is_locked());
        sm.release_source(&source);
        assert!(!tuner.is_locked());
        assert_eq!(sm.tuner_channel_count(), 0);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                SourceEvent::ChannelCountChange(1),
                SourceEvent::ChannelCountChange(0)
            ]
        );
    }

    #[test]
    fn test_retune_refreshes_running_channels() {
        let (tuner, scheduler, sm) = setup(0, PlacementMode::BinAligned, Vec::new());
        let first = sm.source(ch(100_100_000)).unwrap();
        first.start();
        assert_eq!(first.output_indexes(), vec![4]);

        tuner.set_frequency(100_050_000).unwrap();
        sm.receive(InterleavedSamples::new(vec![0.0; 80], 0));
        scheduler.run_pending();
        assert_eq!(first.output_indexes(), vec![2]);
        assert_eq!(first.frequency_offset(), 0);
    }

    #[test]
    fn test_end_to_end_tone() {
        let tone = TestTone {
            frequency: 100_125_000,
            amplitude: 1.0,
        };
        let (tuner, scheduler, sm) = setup(0, PlacementMode::BinAligned, vec![tone]);
        let source = sm.source(TunerChannel::new(100_125_000, 25_000).unwrap()).unwrap();
        let mut rx = source.subscribe();
        source.start();

        let mut iq = tuner.iq_source();
        let mut buf = vec![Complex::new(0.0, 0.0); 10_000];
        for _ in 0..10 {
            iq.read_into(&mut buf).unwrap();
            let timestamp = iq.timestamp_ms();
            assert!(sm.receive(InterleavedSamples::from_complex(&buf, timestamp)));
        }
        for _ in 0..3 {
            scheduler.run_pending();
        }

        let output = rx.try_recv().unwrap();
        assert!(output.mean_power() > 0.5, "power {}", output.mean_power());
    }
}
