//! Rolling time window of temperature samples
//!
//! Samples are stamped with a monotonic clock. Old entries are dropped
//! lazily each time the average is queried; nothing runs on a timer.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::limits;

/// Bounded, time-ordered buffer of `(timestamp, value)` samples
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<(Instant, f64)>,
    capacity: usize,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::with_capacity(limits::WINDOW_CAPACITY)
    }
}

impl SampleWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window holding at most `capacity` samples (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&mut self, at: Instant, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at, value));
    }

    /// Mean of samples newer than `now - max(5s, window_secs)`
    ///
    /// Prunes everything older than the cutoff as a side effect.
    pub fn average(&mut self, now: Instant, window_secs: u64) -> Option<f64> {
        let span = Duration::from_secs(window_secs.max(limits::MIN_WINDOW_SECS));
        // A cutoff before the clock origin means nothing can be stale yet
        if let Some(cutoff) = now.checked_sub(span) {
            while matches!(self.samples.front(), Some((at, _)) if *at < cutoff) {
                self.samples.pop_front();
            }
        }

        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|(_, v)| v).sum();
        Some(sum / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_within_window() {
        let t0 = Instant::now();
        let mut window = SampleWindow::new();
        window.push(t0, 10.0);
        window.push(t0 + secs(5), 20.0);
        assert_eq!(window.average(t0 + secs(6), 10), Some(15.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_floor_is_five_seconds() {
        let t0 = Instant::now();
        let mut window = SampleWindow::new();
        window.push(t0, 10.0);
        window.push(t0 + secs(5), 20.0);

        // window=1 is raised to 5s: cutoff t0+1 drops only the first sample
        assert_eq!(window.average(t0 + secs(6), 1), Some(20.0));
        assert_eq!(window.len(), 1);

        // both samples now older than the 5s floor
        assert_eq!(window.average(t0 + secs(11), 1), None);
        assert!(window.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_on_cutoff_is_kept() {
        let t0 = Instant::now();
        let mut window = SampleWindow::new();
        window.push(t0, 42.0);
        assert_eq!(window.average(t0 + secs(30), 30), Some(42.0));
        assert_eq!(window.average(t0 + secs(31), 30), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let t0 = Instant::now();
        let mut window = SampleWindow::with_capacity(3);
        for (i, value) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
            window.push(t0 + Duration::from_millis(i as u64), value);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(t0 + secs(1), 30), Some(3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_capacity() {
        let t0 = Instant::now();
        let mut window = SampleWindow::new();
        for i in 0..600 {
            window.push(t0, i as f64);
        }
        assert_eq!(window.len(), limits::WINDOW_CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let mut window = SampleWindow::new();
        window.push(Instant::now(), 1.0);
        window.clear();
        assert_eq!(window.average(Instant::now(), 30), None);
    }
}
