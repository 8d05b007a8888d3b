use std::time::Duration;

use crate::retry::RetryPolicy;

/// Engine tunables.
///
/// The source systems this engine descends from never converged on single
/// values for chunk size, retry budget, or concurrency, so all of them are
/// configuration rather than behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chunk size in bytes requested at session creation.
    pub chunk_size: u64,
    /// Maximum upload attempts per chunk before the session fails.
    pub max_chunk_attempts: u32,
    /// Backoff schedule between chunk attempts.
    pub retry: RetryPolicy,
    /// Maximum sessions transferring at once; further starts are queued.
    pub session_cap: usize,
    /// Configured chunk-level concurrency within a session (1-3). The
    /// effective value collapses to 1 while network quality is poor.
    pub chunk_concurrency: usize,
    /// Starting per-chunk timeout.
    pub default_chunk_timeout: Duration,
    /// Per-chunk timeout floor.
    pub min_chunk_timeout: Duration,
    /// Per-chunk timeout ceiling.
    pub max_chunk_timeout: Duration,
    /// Deadline for control calls (create, finalize, pause, cancel, list).
    pub control_timeout: Duration,
    /// Interval between finalize-status polls during async assembly.
    pub finalize_poll_interval: Duration,
    /// Maximum total duration of finalize-status polling.
    pub finalize_poll_budget: Duration,
    /// Watchdog ticker interval.
    pub watchdog_interval: Duration,
    /// Staleness after which the periodic watchdog restarts a session.
    pub watchdog_stale_after: Duration,
    /// Staleness after which a visibility-regained check restarts a session.
    pub visibility_stale_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_chunk_attempts: 10,
            retry: RetryPolicy::default(),
            session_cap: 1,
            chunk_concurrency: 1,
            default_chunk_timeout: Duration::from_secs(120),
            min_chunk_timeout: Duration::from_secs(30),
            max_chunk_timeout: Duration::from_secs(300),
            control_timeout: Duration::from_secs(30),
            finalize_poll_interval: Duration::from_secs(5),
            finalize_poll_budget: Duration::from_secs(30 * 60),
            watchdog_interval: Duration::from_secs(60),
            watchdog_stale_after: Duration::from_secs(180),
            visibility_stale_after: Duration::from_secs(90),
        }
    }
}

impl EngineConfig {
    /// Clamps chunk concurrency to the supported 1-3 range.
    pub fn clamped_chunk_concurrency(&self) -> usize {
        self.chunk_concurrency.clamp(1, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.max_chunk_attempts, 10);
        assert_eq!(config.session_cap, 1);
        assert!(config.min_chunk_timeout < config.default_chunk_timeout);
        assert!(config.default_chunk_timeout < config.max_chunk_timeout);
    }

    #[test]
    fn concurrency_is_clamped() {
        let mut config = EngineConfig::default();
        config.chunk_concurrency = 0;
        assert_eq!(config.clamped_chunk_concurrency(), 1);
        config.chunk_concurrency = 7;
        assert_eq!(config.clamped_chunk_concurrency(), 3);
        config.chunk_concurrency = 2;
        assert_eq!(config.clamped_chunk_concurrency(), 2);
    }
}
