// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::warn;

/// Notified with `true` when a queue enters overflow and `false` when it recovers.
pub type OverflowListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Bounded FIFO that sheds load instead of blocking the producer.
///
/// Reaching `maximum_size` puts the queue into overflow: new items are
/// dropped until consumers drain it down to `reset_threshold`.
pub struct OverflowQueue<T> {
    name: String,
    items: Mutex<VecDeque<T>>,
    maximum_size: usize,
    reset_threshold: usize,
    overflow: AtomicBool,
    dropped: AtomicU64,
    listener: RwLock<Option<OverflowListener>>,
}

impl<T> OverflowQueue<T> {
    pub fn new(name: &str, maximum_size: usize, reset_threshold: usize) -> Self {
        let maximum_size = maximum_size.max(1);
        Self {
            name: name.to_string(),
            items: Mutex::new(VecDeque::new()),
            maximum_size,
            reset_threshold: reset_threshold.min(maximum_size - 1),
            overflow: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            listener: RwLock::new(None),
        }
    }

    pub fn set_overflow_listener(&self, listener: Option<OverflowListener>) {
        if let Ok(mut slot) = self.listener.write() {
            *slot = listener;
        }
    }

    fn notify(&self, overflow: bool) {
        let listener = self.listener.read().ok().and_then(|l| l.clone());
        if let Some(listener) = listener {
            listener(overflow);
        }
    }

    /// Enqueue `item`. Returns `false` when it was dropped because of overflow.
    pub fn offer(&self, item: T) -> bool {
        let entered_overflow = {
            let Ok(mut items) = self.items.lock() else {
                return false;
            };
            if self.overflow.load(Ordering::Acquire) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            items.push_back(item);
            if items.len() >= self.maximum_size {
                self.overflow.store(true, Ordering::Release);
                true
            } else {
                false
            }
        };

        if entered_overflow {
            warn!(
                "{} queue overflow ({} items), dropping until below {}",
                self.name, self.maximum_size, self.reset_threshold
            );
            self.notify(true);
        }
        true
    }

    /// Remove up to `max` items from the head of the queue.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let (batch, recovered) = {
            let Ok(mut items) = self.items.lock() else {
                return Vec::new();
            };
            let count = max.min(items.len());
            let batch: Vec<T> = items.drain(..count).collect();
            let recovered = items.len() <= self.reset_threshold
                && self.overflow.swap(false, Ordering::AcqRel);
            (batch, recovered)
        };

        if recovered {
            self.notify(false);
        }
        batch
    }

    /// Drop every queued item and leave overflow.
    pub fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
        if self.overflow.swap(false, Ordering::AcqRel) {
            self.notify(false);
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_overflow(&self) -> bool {
        self.overflow.load(Ordering::Acquire)
    }

    /// Items rejected while in overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
