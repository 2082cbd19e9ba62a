// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Buffer plumbing between the producer thread, the channelizer and the
//! channel sources: recycled sample storage, a bounded queue with overflow
//! hysteresis and a scheduler-driven drain loop.

pub mod pool;
pub mod processor;
pub mod queue;

pub use pool::{BufferPool, PooledBuffer};
pub use processor::{BatchListener, ContinuousBufferProcessor};
pub use queue::{OverflowListener, OverflowQueue};
