//! Per-tool circuit breaker.
//!
//! closed -> open when recorded failures reach the threshold.
//! open -> closed lazily: the first evaluation after `reset_timeout` clears
//! the circuit and its failure count. There are no background timers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{PolicyContext, PolicyLayer, Verdict};

#[derive(Debug, Clone, Copy, Default)]
struct CircuitState {
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Point-in-time view of one tool's circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitStatus {
    pub failures: u32,
    pub is_open: bool,
    pub reset_in: Option<Duration>,
}

pub struct CircuitBreakerPolicy {
    failure_threshold: u32,
    reset_timeout: Duration,
    circuits: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: u32, reset_timeout_seconds: u64) -> Self {
        Self {
            failure_threshold,
            reset_timeout: Duration::from_secs(reset_timeout_seconds),
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_failure(&self, tool: &str) {
        self.record_failure_at(tool, Instant::now());
    }

    pub fn record_failure_at(&self, tool: &str, now: Instant) {
        let mut circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        let circuit = circuits.entry(tool.to_string()).or_default();
        circuit.failure_count += 1;

        if circuit.failure_count >= self.failure_threshold {
            if circuit.opened_at.is_none() {
                tracing::warn!(
                    tool,
                    failures = circuit.failure_count,
                    "Circuit opened"
                );
            }
            circuit.opened_at = Some(now);
        }
    }

    /// Any success closes the circuit and clears the count
    pub fn record_success(&self, tool: &str) {
        let mut circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(circuit) = circuits.get_mut(tool) {
            *circuit = CircuitState::default();
        }
    }

    pub fn status(&self, tool: &str, now: Instant) -> CircuitStatus {
        let circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        let circuit = circuits.get(tool).copied().unwrap_or_default();
        CircuitStatus {
            failures: circuit.failure_count,
            is_open: circuit.opened_at.is_some(),
            reset_in: circuit.opened_at.map(|opened| {
                self.reset_timeout
                    .saturating_sub(now.saturating_duration_since(opened))
            }),
        }
    }
}

impl PolicyLayer for CircuitBreakerPolicy {
    fn name(&self) -> &str {
        "CircuitBreakerPolicy"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict> {
        let tool = ctx.tool_name();
        let mut circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        let circuit = circuits.get_mut(tool)?;
        let opened_at = circuit.opened_at?;

        let elapsed = ctx.now.saturating_duration_since(opened_at);
        if elapsed < self.reset_timeout {
            let remaining = self.reset_timeout - elapsed;
            return Some(Verdict::block(
                self.name(),
                format!(
                    "Circuit OPEN for '{}'. Tool disabled after {} failures. Retry in {}s.",
                    tool,
                    self.failure_threshold,
                    remaining.as_secs_f64().ceil() as u64
                ),
            ));
        }

        tracing::info!(tool, "Circuit reset after timeout");
        *circuit = CircuitState::default();
        None
    }
}
