// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod channel;
pub mod freq;

pub use channel::TunerChannel;
pub use freq::{format_mhz, FrequencyRange};
