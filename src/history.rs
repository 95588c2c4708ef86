//! Time-bounded rolling buffers
//!
//! Retention is a duration, not a count: every push evicts entries older than
//! `now - retention` from the front.

use std::collections::VecDeque;

/// Ordered (timestamp, value) pairs within a retention window
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    retention_ms: u64,
    entries: VecDeque<(u64, T)>,
}

impl<T> HistoryBuffer<T> {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            retention_ms,
            entries: VecDeque::new(),
        }
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    /// Append an entry and evict stale ones.
    /// Returns false (and leaves the buffer untouched) if `t_ms` goes backwards.
    pub fn push(&mut self, t_ms: u64, value: T) -> bool {
        if let Some(&(last, _)) = self.entries.back() {
            if t_ms < last {
                return false;
            }
        }
        self.entries.push_back((t_ms, value));
        self.evict(t_ms);
        true
    }

    /// Drop entries older than `now_ms - retention`
    pub fn evict(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.retention_ms);
        while let Some(&(ts, _)) = self.entries.front() {
            if ts < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn oldest_ts(&self) -> Option<u64> {
        self.entries.front().map(|(ts, _)| *ts)
    }

    pub fn latest_ts(&self) -> Option<u64> {
        self.entries.back().map(|(ts, _)| *ts)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u64, T)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }
}

/// Population standard deviation; zero for an empty input
pub fn population_std<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut n = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    // Welford
    for x in values {
        n += 1;
        let delta = x - mean;
        mean += delta / n as f64;
        m2 += delta * (x - mean);
    }
    if n == 0 {
        0.0
    } else {
        (m2 / n as f64).sqrt()
    }
}

/// Contraction peak detector with minimum spacing between peaks
#[derive(Debug, Clone)]
pub struct ContractionPeaks {
    threshold: f64,
    min_spacing_ms: u64,
    last_uc: f64,
    last_peak_ms: Option<u64>,
    peaks: HistoryBuffer<()>,
}

impl ContractionPeaks {
    pub fn new(threshold: f64, min_spacing_ms: u64, retention_ms: u64, initial_uc: f64) -> Self {
        Self {
            threshold,
            min_spacing_ms,
            last_uc: initial_uc,
            last_peak_ms: None,
            peaks: HistoryBuffer::new(retention_ms),
        }
    }

    /// Feed one UC value. Returns true if a new peak was recorded.
    pub fn observe(&mut self, t_ms: u64, uc: f64) -> bool {
        let crossed = self.last_uc <= self.threshold && uc > self.threshold;
        let spaced = self
            .last_peak_ms
            .map(|last| t_ms.saturating_sub(last) >= self.min_spacing_ms)
            .unwrap_or(true);
        self.last_uc = uc;

        if crossed && spaced {
            self.last_peak_ms = Some(t_ms);
            self.peaks.push(t_ms, ());
            true
        } else {
            self.peaks.evict(t_ms);
            false
        }
    }

    /// Peaks currently inside the retention window
    pub fn count(&self) -> usize {
        self.peaks.len()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.peaks.iter().map(|(ts, _)| *ts)
    }
}
