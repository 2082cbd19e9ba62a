// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for trx-ddc.
//!
//! Config is loaded from the `[trx-ddc]` section of `trx-ddc.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./trx-ddc.toml`
//! 3. `~/.config/trx-ddc/trx-ddc.toml`
//! 4. `/etc/trx-ddc/trx-ddc.toml`

use serde::{Deserialize, Serialize};
use trx_app::ConfigFile;
use trx_channelizer::{ChannelizerSettings, PlacementMode, TestTone, TunerLimits};
use trx_core::TunerChannel;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DdcConfig {
    pub general: GeneralConfig,
    pub tuner: TunerConfig,
    /// Polyphase filter bank geometry
    pub channelizer: ChannelizerSettings,
    pub placement: PlacementConfig,
    pub report: ReportConfig,
    /// Channels admitted at startup
    pub channels: Vec<TunerChannel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Simulated tuner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Initial center frequency (Hz)
    pub frequency: i64,
    pub limits: TunerLimits,
    /// Carriers injected into the wideband stream
    pub tones: Vec<TestTone>,
    /// Samples per buffer handed to the channel manager
    pub buffer_len: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            frequency: 100_000_000,
            limits: TunerLimits::default(),
            tones: Vec::new(),
            buffer_len: 16_384,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Center frequency selection: "bin_aligned" or "compact"
    pub mode: PlacementMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Interval between per-channel statistics lines (ms)
    pub stats_interval_ms: u64,
    /// Interval between JSON state snapshots (ms); 0 disables them
    pub snapshot_interval_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            stats_interval_ms: 1_000,
            snapshot_interval_ms: 5_000,
        }
    }
}

impl DdcConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        self.tuner
            .limits
            .validate()
            .map_err(|e| format!("[tuner.limits].{}", e))?;
        if !self.tuner.limits.can_tune(self.tuner.frequency) {
            return Err(format!(
                "[tuner].frequency {} Hz is outside the tuner range {}..={} Hz",
                self.tuner.frequency,
                self.tuner.limits.minimum_frequency,
                self.tuner.limits.maximum_frequency
            ));
        }
        if self.tuner.buffer_len == 0 {
            return Err("[tuner].buffer_len must be > 0".to_string());
        }
        if let Some(tone) = self.tuner.tones.iter().find(|t| !t.amplitude.is_finite()) {
            return Err(format!(
                "[tuner].tones amplitude for {} Hz must be finite",
                tone.frequency
            ));
        }

        if self.channelizer.taps_per_channel == 0 {
            return Err("[channelizer].taps_per_channel must be > 0".to_string());
        }
        if let Some(count) = self.channelizer.channel_count {
            if count < 2 || count % 2 != 0 {
                return Err(format!(
                    "[channelizer].channel_count must be even and >= 2 (got {})",
                    count
                ));
            }
        }

        if self.report.stats_interval_ms == 0 {
            return Err("[report].stats_interval_ms must be > 0".to_string());
        }

        for channel in &self.channels {
            if !self.tuner.limits.is_tunable(channel) {
                return Err(format!("[[channels]] {} is not tunable", channel));
            }
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the `[trx-ddc]`
    /// section header.
    pub fn example_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "trx-ddc")]
            inner: DdcConfig,
        }
        let example = DdcConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            tuner: TunerConfig {
                tones: vec![
                    TestTone {
                        frequency: 100_125_000,
                        amplitude: 0.5,
                    },
                    TestTone {
                        frequency: 100_410_000,
                        amplitude: 0.25,
                    },
                ],
                ..TunerConfig::default()
            },
            channelizer: ChannelizerSettings::default(),
            placement: PlacementConfig::default(),
            report: ReportConfig::default(),
            channels: [(100_125_000, 25_000), (100_412_500, 12_500)]
                .into_iter()
                .filter_map(|(frequency, bandwidth)| TunerChannel::new(frequency, bandwidth).ok())
                .collect(),
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for DdcConfig {
    fn section_key() -> &'static str {
        "trx-ddc"
    }
}
