// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Source event notification system.
//!
//! Tuners, the channel manager and channel sources exchange typed
//! [`SourceEvent`]s: upstream notifications (frequency / sample-rate change),
//! downstream notifications (frequency correction, overflow, stream start
//! and stop) and requests from a channel to its producer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Unique identifier of a channel source, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Event exchanged between tuner, channel manager and channel sources.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// Tuner center frequency changed (Hz).
    FrequencyChange(i64),
    /// Tuner sample rate changed (Hz).
    SampleRateChange(f64),
    /// Number of allocated channels changed.
    ChannelCountChange(usize),
    /// Channel frequency correction changed (Hz).
    FrequencyCorrectionChange(i64),
    /// Frequency error measured by a downstream consumer (Hz).
    MeasuredFrequencyError(i64),
    /// Tuner frequency/sample-rate controls locked or unlocked.
    Locked(bool),
    /// Channel sample stream started.
    StartSampleStream,
    /// Channel sample stream stopped (also sent on a forced stop).
    StopSampleStream,
    /// Queue overflow state changed.
    SourceOverflow(bool),
    /// Channel entered an error state.
    Error(String),
    /// Channel asks its producer to start streaming.
    RequestStartSampleStream(ChannelId),
    /// Channel asks its producer to stop streaming.
    RequestStopSampleStream(ChannelId),
    /// Channel asks its producer to dispose of it.
    RequestDispose(ChannelId),
}

/// Receiver of source events.
pub trait SourceEventListener: Send + Sync {
    fn on_source_event(&self, event: &SourceEvent);
}

impl<F> SourceEventListener for F
where
    F: Fn(&SourceEvent) + Send + Sync,
{
    fn on_source_event(&self, event: &SourceEvent) {
        self(event)
    }
}

/// Manages registered listeners and dispatches events.
///
/// Listeners are invoked outside the registry lock, so a listener may
/// register or unregister listeners while handling an event.
#[derive(Default)]
pub struct SourceEventBroadcaster {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn SourceEventListener>)>>,
}

impl SourceEventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener to receive events.
    /// Returns an ID that can be used to unregister the listener.
    pub fn register(&self, listener: Arc<dyn SourceEventListener>) -> ListenerId {
        let id = ListenerId::new();
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((id, listener));
        }
        id
    }

    /// Unregister a listener by its ID.
    pub fn unregister(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|(lid, _)| *lid != id);
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.clear();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn broadcast(&self, event: &SourceEvent) {
        let snapshot: Vec<Arc<dyn SourceEventListener>> = match self.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener.on_source_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        events: Mutex<Vec<SourceEvent>>,
    }

    impl SourceEventListener for Recorder {
        fn on_source_event(&self, event: &SourceEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_register_and_broadcast() {
        let broadcaster = SourceEventBroadcaster::new();
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        let id = broadcaster.register(recorder.clone());
        assert_eq!(broadcaster.listener_count(), 1);

        broadcaster.broadcast(&SourceEvent::FrequencyChange(100_000_000));
        broadcaster.broadcast(&SourceEvent::SourceOverflow(true));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                SourceEvent::FrequencyChange(100_000_000),
                SourceEvent::SourceOverflow(true)
            ]
        );

        broadcaster.unregister(id);
        assert_eq!(broadcaster.listener_count(), 0);
        broadcaster.broadcast(&SourceEvent::StopSampleStream);
        assert_eq!(recorder.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_closure_listener() {
        let broadcaster = SourceEventBroadcaster::new();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();
        broadcaster.register(Arc::new(move |event: &SourceEvent| {
            if let SourceEvent::ChannelCountChange(count) = event {
                seen_clone.store(*count as u64, Ordering::Relaxed);
            }
        }));
        broadcaster.broadcast(&SourceEvent::ChannelCountChange(3));
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_channel_ids_are_unique() {
        let a = ChannelId::new();
        let b = ChannelId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("ch-"));
    }
}
