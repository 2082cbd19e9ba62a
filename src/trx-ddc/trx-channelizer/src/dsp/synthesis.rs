// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::filter::synthesis_filter;
use crate::error::FilterDesignError;

type FilterKey = (u64, u64, usize);

/// Cache of synthesis filters keyed by channel sample rate, channel
/// bandwidth and input channel count.
#[derive(Default)]
pub struct SynthesisFilterManager {
    filters: Mutex<HashMap<FilterKey, Arc<[f32]>>>,
}

impl SynthesisFilterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached taps, designed on first request.
    pub fn filter(
        &self,
        channel_sample_rate: f64,
        channel_bandwidth: f64,
        channel_count: usize,
    ) -> Result<Arc<[f32]>, FilterDesignError> {
        let key = (
            channel_sample_rate.to_bits(),
            channel_bandwidth.to_bits(),
            channel_count,
        );
        if let Some(taps) = self.filters.lock().ok().and_then(|f| f.get(&key).cloned()) {
            return Ok(taps);
        }

        let taps: Arc<[f32]> =
            synthesis_filter(channel_sample_rate, channel_bandwidth, channel_count)?.into();
        debug!(
            "Designed {}-tap synthesis filter: {:.1} Hz rate, {:.1} Hz bandwidth, {} channels",
            taps.len(),
            channel_sample_rate,
            channel_bandwidth,
            channel_count
        );
        if let Ok(mut filters) = self.filters.lock() {
            filters.insert(key, taps.clone());
        }
        Ok(taps)
    }

    pub fn clear(&self) {
        if let Ok(mut filters) = self.filters.lock() {
            filters.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.filters.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_are_cached_per_key() {
        let manager = SynthesisFilterManager::new();
        let a = manager.filter(50_000.0, 25_000.0, 2).unwrap();
        let b = manager.filter(50_000.0, 25_000.0, 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);

        let c = manager.filter(60_000.0, 30_000.0, 2).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_clear_forces_redesign() {
        let manager = SynthesisFilterManager::new();
        let a = manager.filter(50_000.0, 25_000.0, 2).unwrap();
        manager.clear();
        assert!(manager.is_empty());
        let b = manager.filter(50_000.0, 25_000.0, 2).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(&*a, &*b);
    }

    #[test]
    fn test_design_failure_is_not_cached() {
        let manager = SynthesisFilterManager::new();
        assert!(manager.filter(50_000.0, 25_000.0, 1).is_err());
        assert!(manager.filter(f64::NAN, 25_000.0, 2).is_err());
        assert!(manager.is_empty());
    }
}
