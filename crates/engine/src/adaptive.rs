use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Consecutive successes required before the timeout steps back down.
const SUCCESS_STEP_THRESHOLD: u32 = 5;
/// Consecutive failures required before the timeout steps up.
const FAILURE_STEP_THRESHOLD: u32 = 3;

/// Rolling-window size for network quality classification.
const QUALITY_WINDOW: usize = 20;
/// Minimum observations before a classification is attempted.
const QUALITY_MIN_SAMPLES: usize = 5;
/// Mean throughput above which the network reads as good.
const GOOD_THROUGHPUT: f64 = 1024.0 * 1024.0; // 1 MiB/s
/// Mean throughput below which the network reads as poor.
const POOR_THROUGHPUT: f64 = 128.0 * 1024.0; // 128 KiB/s
const GOOD_SUCCESS_RATE: f64 = 0.9;
const POOR_SUCCESS_RATE: f64 = 0.6;

// ---------------------------------------------------------------------------
// AdaptiveTimeout
// ---------------------------------------------------------------------------

/// Per-session chunk timeout, tuned by observed outcomes.
///
/// Repeated failures step the timeout up toward the ceiling; a run of
/// successes while above the default steps it back down.
#[derive(Debug, Clone)]
pub struct AdaptiveTimeout {
    current: Duration,
    default: Duration,
    floor: Duration,
    ceiling: Duration,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

impl AdaptiveTimeout {
    pub fn new(default: Duration, floor: Duration, ceiling: Duration) -> Self {
        Self {
            current: default,
            default,
            floor,
            ceiling,
            consecutive_successes: 0,
            consecutive_failures: 0,
        }
    }

    /// Current per-chunk deadline.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Records a successful chunk transfer.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;

        if self.consecutive_successes >= SUCCESS_STEP_THRESHOLD && self.current > self.default {
            // Halve the distance back toward the default.
            let above = self.current - self.default;
            self.current = (self.default + above / 2).max(self.floor);
            self.consecutive_successes = 0;
            debug!(timeout_secs = self.current.as_secs(), "chunk timeout stepped down");
        }
    }

    /// Records a failed chunk transfer (timeout or network).
    pub fn record_failure(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;

        if self.consecutive_failures >= FAILURE_STEP_THRESHOLD {
            self.current = Duration::from_secs_f64(
                (self.current.as_secs_f64() * 1.5).min(self.ceiling.as_secs_f64()),
            );
            self.consecutive_failures = 0;
            debug!(timeout_secs = self.current.as_secs(), "chunk timeout stepped up");
        }
    }
}

// ---------------------------------------------------------------------------
// NetworkMonitor
// ---------------------------------------------------------------------------

/// Coarse network quality derived from recent chunk outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    Good,
    Fair,
    Poor,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    bytes_per_sec: f64,
    ok: bool,
}

/// Engine-global rolling window of chunk transfer outcomes across all
/// sessions, classified into a quality grade that modulates effective
/// chunk concurrency.
pub struct NetworkMonitor {
    window: Mutex<VecDeque<Observation>>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(QUALITY_WINDOW)),
        }
    }

    /// Records one chunk outcome. `bytes_per_sec` is 0 for failures.
    pub fn record(&self, bytes_per_sec: f64, ok: bool) {
        let mut window = self.window.lock().unwrap();
        if window.len() == QUALITY_WINDOW {
            window.pop_front();
        }
        window.push_back(Observation { bytes_per_sec, ok });
    }

    /// Classifies current quality from the rolling window.
    pub fn quality(&self) -> NetworkQuality {
        let window = self.window.lock().unwrap();
        if window.len() < QUALITY_MIN_SAMPLES {
            return NetworkQuality::Unknown;
        }

        let successes = window.iter().filter(|o| o.ok).count();
        let success_rate = successes as f64 / window.len() as f64;
        let mean_throughput = if successes == 0 {
            0.0
        } else {
            window
                .iter()
                .filter(|o| o.ok)
                .map(|o| o.bytes_per_sec)
                .sum::<f64>()
                / successes as f64
        };

        if success_rate < POOR_SUCCESS_RATE || mean_throughput < POOR_THROUGHPUT {
            NetworkQuality::Poor
        } else if success_rate >= GOOD_SUCCESS_RATE && mean_throughput >= GOOD_THROUGHPUT {
            NetworkQuality::Good
        } else {
            NetworkQuality::Fair
        }
    }

    /// Concurrency actually used for the next batch: the configured value,
    /// collapsed to 1 while quality reads poor.
    pub fn effective_concurrency(&self, configured: usize) -> usize {
        let configured = configured.clamp(1, 3);
        match self.quality() {
            NetworkQuality::Poor => 1,
            _ => configured,
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedWindow
// ---------------------------------------------------------------------------

/// Per-session transfer speed over a sliding time window.
#[derive(Debug)]
pub struct SpeedWindow {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    max_samples: usize,
}

impl Default for SpeedWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 100)
    }
}

impl SpeedWindow {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples,
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));

        let cutoff = now - self.window;
        while self.samples.front().is_some_and(|(t, _)| *t < cutoff) {
            self.samples.pop_front();
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average speed in bytes/second within the window (0.0 under 2 samples).
    pub fn bytes_per_second(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let first = self.samples.front().unwrap().0;
        let last = self.samples.back().unwrap().0;
        let elapsed = last.duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|(_, b)| *b).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated seconds to transfer `remaining_bytes`, if speed is known.
    pub fn eta_secs(&self, remaining_bytes: u64) -> Option<f64> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(remaining_bytes as f64 / speed)
    }
}
