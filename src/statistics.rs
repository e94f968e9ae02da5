// Orchestration statistics: monotonic counters plus bounded rolling
// samples for queue wait time and sequence run time.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default number of samples retained per distribution.
pub const DEFAULT_SAMPLE_WINDOW: usize = 256;

/// Monotonic counters over sequence lifecycle transitions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    pub queued: u64,
    pub started: u64,
    pub completed: u64,
    pub errored: u64,
    pub cancelled: u64,
    pub duplicates: u64,
}

/// Percentile summary of one rolling distribution, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DistributionSnapshot {
    pub count: usize,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub max: f64,
}

/// Point-in-time view of the statistics manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub counters: Counters,
    pub wait_time: DistributionSnapshot,
    pub run_time: DistributionSnapshot,
}

#[derive(Debug)]
struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn snapshot(&self) -> DistributionSnapshot {
        if self.samples.is_empty() {
            return DistributionSnapshot::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let percentile = |p: f64| {
            let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
            sorted[rank.min(sorted.len() - 1)]
        };
        DistributionSnapshot {
            count: sorted.len(),
            p50: percentile(50.0),
            p90: percentile(90.0),
            p99: percentile(99.0),
            max: sorted[sorted.len() - 1],
        }
    }
}

#[derive(Debug)]
struct StatsInner {
    counters: Counters,
    wait_times: RollingWindow,
    run_times: RollingWindow,
}

#[derive(Debug)]
pub struct StatisticsManager {
    inner: Mutex<StatsInner>,
}

impl StatisticsManager {
    pub fn new(sample_window: usize) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                counters: Counters::default(),
                wait_times: RollingWindow::new(sample_window.max(1)),
                run_times: RollingWindow::new(sample_window.max(1)),
            }),
        }
    }

    pub fn record_sequence_queued(&self) {
        self.inner.lock().counters.queued += 1;
    }

    pub fn record_sequence_started(&self) {
        self.inner.lock().counters.started += 1;
    }

    pub fn record_sequence_completed(&self, runtime: Duration) {
        let mut inner = self.inner.lock();
        inner.counters.completed += 1;
        inner.run_times.record(runtime.as_secs_f64() * 1000.0);
    }

    pub fn record_error(&self) {
        self.inner.lock().counters.errored += 1;
    }

    pub fn record_cancelled(&self) {
        self.inner.lock().counters.cancelled += 1;
    }

    pub fn record_duplicate(&self) {
        self.inner.lock().counters.duplicates += 1;
    }

    pub fn record_queue_wait(&self, wait: Duration) {
        self.inner
            .lock()
            .wait_times
            .record(wait.as_secs_f64() * 1000.0);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let inner = self.inner.lock();
        StatisticsSnapshot {
            counters: inner.counters,
            wait_time: inner.wait_times.snapshot(),
            run_time: inner.run_times.snapshot(),
        }
    }
}

impl Default for StatisticsManager {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = StatisticsManager::default();
        stats.record_sequence_queued();
        stats.record_sequence_queued();
        stats.record_sequence_started();
        stats.record_sequence_completed(Duration::from_millis(12));
        stats.record_error();
        stats.record_cancelled();
        stats.record_duplicate();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.counters.queued, 2);
        assert_eq!(snapshot.counters.started, 1);
        assert_eq!(snapshot.counters.completed, 1);
        assert_eq!(snapshot.counters.errored, 1);
        assert_eq!(snapshot.counters.cancelled, 1);
        assert_eq!(snapshot.counters.duplicates, 1);
    }

    #[test]
    fn test_distribution_percentiles() {
        let stats = StatisticsManager::new(100);
        for ms in 1..=100u64 {
            stats.record_queue_wait(Duration::from_millis(ms));
        }

        let wait = stats.snapshot().wait_time;
        assert_eq!(wait.count, 100);
        assert!((wait.p50 - 50.0).abs() <= 1.0);
        assert!((wait.p90 - 90.0).abs() <= 1.0);
        assert!((wait.p99 - 99.0).abs() <= 1.0);
        assert_eq!(wait.max, 100.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let stats = StatisticsManager::new(4);
        for ms in [1u64, 2, 3, 4, 100, 200, 300, 400] {
            stats.record_sequence_completed(Duration::from_millis(ms));
        }

        let run = stats.snapshot().run_time;
        assert_eq!(run.count, 4);
        // Early samples fell out of the window.
        assert!(run.p50 >= 100.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = StatisticsManager::default().snapshot();
        assert_eq!(snapshot.wait_time.count, 0);
        assert_eq!(snapshot.run_time.max, 0.0);
    }
}
