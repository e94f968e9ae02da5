// Recent-hash window used to absorb double-invocation races.
//
// Entries older than the window are evicted lazily on lookup and insert; a
// duplicate is any admission whose canonical hash is still present.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default dedup window, in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 1000;

#[derive(Debug)]
pub struct DuplicationDetector {
    window: Duration,
    entries: VecDeque<(u64, Instant)>,
}

impl DuplicationDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True when `hash` was recorded within the window.
    pub fn contains(&mut self, hash: u64) -> bool {
        self.evict_expired();
        self.entries.iter().any(|(h, _)| *h == hash)
    }

    /// Record a hash at the current instant.
    pub fn record(&mut self, hash: u64) {
        self.evict_expired();
        self.entries.push_back((hash, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        while let Some((_, inserted_at)) = self.entries.front() {
            if now.duration_since(*inserted_at) > self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for DuplicationDetector {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_WINDOW_MS))
    }
}
