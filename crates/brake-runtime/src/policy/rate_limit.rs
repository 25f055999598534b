//! Session-wide sliding-window rate limit with a warning band.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{PolicyContext, PolicyLayer, Verdict};

const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Current window occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub current: usize,
    pub limit: usize,
    pub window: Duration,
}

/// Counts calls in the trailing window. Warns once the window holds 80% of
/// the limit (rounded down), blocks once it is full. Blocked calls are not
/// counted.
pub struct RateLimitPolicy {
    calls_per_window: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimitPolicy {
    pub fn new(calls_per_window: usize, window_seconds: u64) -> Self {
        Self {
            calls_per_window,
            window: Duration::from_secs(window_seconds),
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Suggested wait before retrying, doubling per call over the limit
    fn backoff_ms(&self, current: usize) -> u64 {
        let overage = current.saturating_sub(self.calls_per_window) as u32;
        BASE_BACKOFF_MS
            .saturating_mul(2u64.saturating_pow(overage))
            .min(MAX_BACKOFF_MS)
    }

    /// Calls already in the window at which the next call warns: 80% of
    /// the limit, rounded down
    fn warning_threshold(&self) -> usize {
        self.calls_per_window * 4 / 5
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = timestamps.front() {
            if now.saturating_duration_since(*oldest) < self.window {
                break;
            }
            timestamps.pop_front();
        }
    }

    pub fn current_rate(&self, now: Instant) -> RateSnapshot {
        let mut timestamps = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut timestamps, now);
        RateSnapshot {
            current: timestamps.len(),
            limit: self.calls_per_window,
            window: self.window,
        }
    }
}

impl PolicyLayer for RateLimitPolicy {
    fn name(&self) -> &str {
        "RateLimitPolicy"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict> {
        let mut timestamps = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut timestamps, ctx.now);
        let current = timestamps.len();

        if current >= self.calls_per_window {
            return Some(Verdict::block(
                self.name(),
                format!(
                    "Rate limit exceeded ({}/{}). Retry after {}ms.",
                    current,
                    self.calls_per_window,
                    self.backoff_ms(current)
                ),
            ));
        }

        timestamps.push_back(ctx.now);

        if current >= self.warning_threshold() {
            return Some(Verdict::warn(
                self.name(),
                format!(
                    "Approaching rate limit ({}/{}).",
                    current + 1,
                    self.calls_per_window
                ),
            ));
        }

        None
    }
}
