// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use trx_core::{ListenerId, SourceEvent, SourceEventBroadcaster, SourceEventListener};

use super::{TunerController, TunerLimits};
use crate::dsp::IqSource;
use crate::error::TunerError;

/// Carrier injected by [`SimulatedTuner`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestTone {
    /// Absolute frequency (Hz).
    pub frequency: i64,
    /// Linear amplitude.
    #[serde(default = "default_amplitude")]
    pub amplitude: f32,
}

fn default_amplitude() -> f32 {
    0.5
}

struct TunerState {
    frequency: i64,
    sample_rate: f64,
    locked: bool,
}

/// Tuner stand-in producing a fixed set of test tones.
pub struct SimulatedTuner {
    state: Mutex<TunerState>,
    limits: TunerLimits,
    tones: Vec<TestTone>,
    events: SourceEventBroadcaster,
}

impl SimulatedTuner {
    pub fn new(frequency: i64, limits: TunerLimits, tones: Vec<TestTone>) -> Result<Self, TunerError> {
        if !limits.can_tune(frequency) {
            return Err(TunerError::FrequencyOutOfRange {
                frequency,
                min: limits.minimum_frequency,
                max: limits.maximum_frequency,
            });
        }
        Ok(Self {
            state: Mutex::new(TunerState {
                frequency,
                sample_rate: limits.sample_rate,
                locked: false,
            }),
            limits,
            tones,
            events: SourceEventBroadcaster::new(),
        })
    }

    pub fn tones(&self) -> &[TestTone] {
        &self.tones
    }

    /// Change the sample rate and notify listeners.
    pub fn set_sample_rate(&self, sample_rate: f64) -> Result<(), TunerError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(TunerError::Device(format!(
                "invalid sample rate {} Hz",
                sample_rate
            )));
        }
        self.state
            .lock()
            .map_err(|_| TunerError::Device("tuner state poisoned".to_string()))?
            .sample_rate = sample_rate;
        info!("Simulated tuner sample rate {:.1} Hz", sample_rate);
        self.events
            .broadcast(&SourceEvent::SampleRateChange(sample_rate));
        Ok(())
    }

    /// Sample reader for the producer thread.
    pub fn iq_source(self: &Arc<Self>) -> SimulatedIqSource {
        SimulatedIqSource {
            tuner: self.clone(),
            phases: vec![0.0; self.tones.len()],
            emitted: 0,
        }
    }
}

impl TunerController for SimulatedTuner {
    fn frequency(&self) -> i64 {
        self.state.lock().map(|s| s.frequency).unwrap_or(0)
    }

    fn set_frequency(&self, frequency: i64) -> Result<(), TunerError> {
        if !self.limits.can_tune(frequency) {
            return Err(TunerError::FrequencyOutOfRange {
                frequency,
                min: self.limits.minimum_frequency,
                max: self.limits.maximum_frequency,
            });
        }
        self.state
            .lock()
            .map_err(|_| TunerError::Device("tuner state poisoned".to_string()))?
            .frequency = frequency;
        debug!("Simulated tuner tuned to {} Hz", frequency);
        self.events.broadcast(&SourceEvent::FrequencyChange(frequency));
        Ok(())
    }

    fn sample_rate(&self) -> f64 {
        self.state.lock().map(|s| s.sample_rate).unwrap_or(0.0)
    }

    fn limits(&self) -> TunerLimits {
        TunerLimits {
            sample_rate: self.sample_rate(),
            ..self.limits
        }
    }

    fn set_locked(&self, locked: bool) {
        let changed = match self.state.lock() {
            Ok(mut state) => std::mem::replace(&mut state.locked, locked) != locked,
            Err(_) => false,
        };
        if changed {
            self.events.broadcast(&SourceEvent::Locked(locked));
        }
    }

    fn is_locked(&self) -> bool {
        self.state.lock().map(|s| s.locked).unwrap_or(false)
    }

    fn add_listener(&self, listener: Arc<dyn SourceEventListener>) -> ListenerId {
        self.events.register(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.events.unregister(id);
    }
}

/// Generates the tuner's tones relative to its current center frequency.
pub struct SimulatedIqSource {
    tuner: Arc<SimulatedTuner>,
    phases: Vec<f64>,
    emitted: u64,
}

impl SimulatedIqSource {
    /// Milliseconds of samples produced so far.
    pub fn timestamp_ms(&self) -> u64 {
        let rate = self.tuner.sample_rate();
        if rate > 0.0 {
            (self.emitted as f64 * 1000.0 / rate) as u64
        } else {
            0
        }
    }
}

impl IqSource for SimulatedIqSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> Result<usize, TunerError> {
        let center = self.tuner.frequency();
        let rate = self.tuner.sample_rate();
        buf.fill(Complex::new(0.0, 0.0));

        for (tone, phase) in self.tuner.tones.iter().zip(self.phases.iter_mut()) {
            let offset = (tone.frequency - center) as f64;
            if offset.abs() >= rate / 2.0 {
                continue;
            }
            let inc = TAU * offset / rate;
            for sample in buf.iter_mut() {
                let (sin, cos) = phase.sin_cos();
                *sample += Complex::new(cos as f32, sin as f32) * tone.amplitude;
                *phase += inc;
            }
            *phase = phase.rem_euclid(TAU);
        }
        self.emitted += buf.len() as u64;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuner(tones: Vec<TestTone>) -> Arc<SimulatedTuner> {
        let limits = TunerLimits {
            sample_rate: 1_000_000.0,
            ..TunerLimits::default()
        };
        Arc::new(SimulatedTuner::new(100_000_000, limits, tones).unwrap())
    }

    #[test]
    fn test_set_frequency_checks_limits_and_notifies() {
        let t = tuner(Vec::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        t.add_listener(Arc::new(move |e: &SourceEvent| sink.lock().unwrap().push(e.clone())));

        t.set_frequency(101_000_000).unwrap();
        assert_eq!(t.frequency(), 101_000_000);
        assert!(matches!(
            t.set_frequency(5_000_000_000),
            Err(TunerError::FrequencyOutOfRange { .. })
        ));
        t.set_sample_rate(2_000_000.0).unwrap();
        assert_eq!(t.limits().sample_rate, 2_000_000.0);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                SourceEvent::FrequencyChange(101_000_000),
                SourceEvent::SampleRateChange(2_000_000.0)
            ]
        );
    }

    #[test]
    fn test_lock_notifies_on_change_only() {
        let t = tuner(Vec::new());
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        t.add_listener(Arc::new(move |_: &SourceEvent| *sink.lock().unwrap() += 1));
        t.set_locked(true);
        t.set_locked(true);
        assert!(t.is_locked());
        t.set_locked(false);
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn test_tone_follows_center_frequency() {
        let t = tuner(vec![TestTone {
            frequency: 100_250_000,
            amplitude: 1.0,
        }]);
        let mut source = t.iq_source();
        let mut buf = vec![Complex::new(0.0, 0.0); 8];
        assert_eq!(source.read_into(&mut buf).unwrap(), 8);
        // fs/4 above center: a quarter turn per sample.
        assert!((buf[1] - Complex::new(0.0, 1.0)).norm() < 1e-5);
        assert_eq!(source.timestamp_ms(), 0);

        t.set_frequency(100_250_000).unwrap();
        source.read_into(&mut buf).unwrap();
        assert!((buf[0] - buf[7]).norm() < 1e-5);
    }

    #[test]
    fn test_out_of_band_tone_is_silent() {
        let t = tuner(vec![TestTone {
            frequency: 110_000_000,
            amplitude: 1.0,
        }]);
        let mut source = t.iq_source();
        let mut buf = vec![Complex::new(1.0, 1.0); 16];
        source.read_into(&mut buf).unwrap();
        assert!(buf.iter().all(|s| s.norm() == 0.0));
    }
}
