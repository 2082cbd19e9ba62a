// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::debug;

use super::queue::{OverflowListener, OverflowQueue};
use crate::scheduler::{ScheduledTask, Scheduler};

/// Receives the batch drained on each tick.
pub type BatchListener<T> = Arc<dyn Fn(Vec<T>) + Send + Sync>;

/// Decouples a producer from a consumer: items are queued on
/// [`receive`](Self::receive) and handed to the listener in FIFO batches on
/// every scheduler tick while the processor is running.
pub struct ContinuousBufferProcessor<T: Send + 'static> {
    name: String,
    period: Duration,
    scheduler: Arc<dyn Scheduler>,
    queue: Arc<OverflowQueue<T>>,
    listener: Arc<RwLock<Option<BatchListener<T>>>>,
    task: Mutex<Option<ScheduledTask>>,
}

impl<T: Send + 'static> ContinuousBufferProcessor<T> {
    pub fn new(
        name: &str,
        scheduler: Arc<dyn Scheduler>,
        period: Duration,
        maximum_size: usize,
        reset_threshold: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            period,
            scheduler,
            queue: Arc::new(OverflowQueue::new(name, maximum_size, reset_threshold)),
            listener: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    pub fn set_listener(&self, listener: Option<BatchListener<T>>) {
        if let Ok(mut slot) = self.listener.write() {
            *slot = listener;
        }
    }

    pub fn set_overflow_listener(&self, listener: Option<OverflowListener>) {
        self.queue.set_overflow_listener(listener);
    }

    /// Queue an item. Returns `false` when the queue is in overflow.
    pub fn receive(&self, item: T) -> bool {
        self.queue.offer(item)
    }

    pub fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.is_some() {
            return;
        }

        let queue = self.queue.clone();
        let listener = self.listener.clone();
        *task = Some(self.scheduler.schedule_at_fixed_rate(
            &self.name,
            self.period,
            Box::new(move || dispatch(&queue, &listener)),
        ));
        debug!("{} started", self.name);
    }

    /// Cancel the drain task and discard queued items.
    pub fn stop(&self) {
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(mut task) = task {
            task.cancel();
            debug!("{} stopped", self.name);
        }
        self.queue.clear();
    }

    /// Drain once on the calling thread.
    pub fn flush(&self) {
        dispatch(&self.queue, &self.listener);
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_overflow(&self) -> bool {
        self.queue.is_overflow()
    }
}

impl<T: Send + 'static> Drop for ContinuousBufferProcessor<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch<T>(queue: &OverflowQueue<T>, listener: &RwLock<Option<BatchListener<T>>>) {
    let batch = queue.drain(usize::MAX);
    if batch.is_empty() {
        return;
    }
    let listener = listener.read().ok().and_then(|l| l.clone());
    if let Some(listener) = listener {
        listener(batch);
    }
}
