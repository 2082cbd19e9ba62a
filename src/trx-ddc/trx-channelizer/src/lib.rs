// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Polyphase channelizer and digital drop channel engine.
//!
//! A wideband tuner stream is split by a 2× oversampled polyphase filter bank
//! into equal-width bins. Each requested [`TunerChannel`](trx_core::TunerChannel)
//! is served from one bin, or from two adjacent bins recombined by a
//! synthesis filter, then mixed to baseband and published as
//! [`ComplexSamples`](trx_core::ComplexSamples).

pub mod buffer;
pub mod dsp;
pub mod error;
pub mod manager;
pub mod scheduler;
pub mod source;
pub mod tuner;

pub use dsp::calculator::{ChannelCalculator, IndexBoundaryPolicy};
pub use dsp::channelizer::{ChannelResults, ChannelResultsListener, PolyphaseChannelizer};
pub use dsp::output::ChannelOutputProcessor;
pub use dsp::synthesis::SynthesisFilterManager;
pub use dsp::IqSource;
pub use error::{
    AdmissionError, ChannelIndexError, ChannelizerError, FilterDesignError, PlacementError,
    TunerError,
};
pub use manager::{ChannelizerSettings, ManagerSnapshot, PolyphaseChannelManager};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};
pub use source::PolyphaseChannelSource;
pub use tuner::placement::CenterFrequencyCalculator;
pub use tuner::simulated::{SimulatedIqSource, SimulatedTuner, TestTone};
pub use tuner::source_manager::PolyphaseChannelSourceManager;
pub use tuner::{PlacementMode, TunerController, TunerLimits};
