// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod radio;
pub mod sample;
pub mod source;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use radio::{FrequencyRange, TunerChannel};
pub use sample::{ComplexSamples, InterleavedSamples};
pub use source::{ChannelId, ListenerId, SourceEvent, SourceEventBroadcaster, SourceEventListener};
