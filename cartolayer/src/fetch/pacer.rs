//! Per-host request pacing with exponential backoff.
//!
//! Each hostname tracks its last request time and a consecutive-error count.
//! The required spacing between requests to a host grows exponentially with
//! its error count, capped at a 32× multiplier, and resets on the first
//! success.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Cap on the backoff exponent: spacing never exceeds `base × 2^5`.
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, Clone, Copy)]
struct HostState {
    last_request: Option<Instant>,
    error_count: u32,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            last_request: None,
            error_count: 0,
        }
    }
}

/// Tracks request pacing state per hostname.
pub struct HostPacer {
    base_interval: Duration,
    hosts: DashMap<String, HostState>,
}

impl HostPacer {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            hosts: DashMap::new(),
        }
    }

    /// Spacing required before the next request to a host with the given
    /// consecutive-error count: `base × 2^min(errors, 5)`.
    pub fn required_spacing(&self, error_count: u32) -> Duration {
        self.base_interval * (1u32 << error_count.min(MAX_BACKOFF_EXPONENT))
    }

    /// How long the caller must still wait before hitting `host`.
    ///
    /// Zero when the host is cold or the spacing has already elapsed.
    pub fn delay_for(&self, host: &str) -> Duration {
        let Some(state) = self.hosts.get(host) else {
            return Duration::ZERO;
        };
        let Some(last) = state.last_request else {
            return Duration::ZERO;
        };
        let spacing = self.required_spacing(state.error_count);
        spacing.saturating_sub(last.elapsed())
    }

    /// Record that a request to `host` is being issued now.
    pub fn note_request(&self, host: &str) {
        self.hosts.entry(host.to_string()).or_default().last_request = Some(Instant::now());
    }

    /// Reset the host's error count after a successful response.
    pub fn record_success(&self, host: &str) {
        if let Some(mut state) = self.hosts.get_mut(host) {
            state.error_count = 0;
        }
    }

    /// Bump the host's consecutive-error count.
    pub fn record_failure(&self, host: &str) {
        self.hosts.entry(host.to_string()).or_default().error_count += 1;
    }

    /// Current consecutive-error count for a host.
    pub fn error_count(&self, host: &str) -> u32 {
        self.hosts.get(host).map(|s| s.error_count).unwrap_or(0)
    }
}
