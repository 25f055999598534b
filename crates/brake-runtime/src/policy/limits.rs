//! Session-wide limits: call quota, runtime ceiling and tool allow/deny lists.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use super::{PolicyAction, PolicyContext, PolicyLayer, Verdict};

// ============================================================================
// Call quota
// ============================================================================

/// Blocks once the session has made `max_calls` tool calls.
pub struct MaxToolCallsPolicy {
    max_calls: u64,
}

impl MaxToolCallsPolicy {
    pub fn new(max_calls: u64) -> Self {
        Self { max_calls }
    }
}

impl PolicyLayer for MaxToolCallsPolicy {
    fn name(&self) -> &str {
        "MaxToolCallsPolicy"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict> {
        if ctx.state.call_count >= self.max_calls {
            return Some(Verdict::block(
                self.name(),
                format!(
                    "Maximum tool calls limit ({}) has been reached.",
                    self.max_calls
                ),
            ));
        }
        None
    }
}

// ============================================================================
// Runtime ceiling
// ============================================================================

/// Kills the session once it has been running longer than `max_runtime`.
/// The clock starts when the policy is constructed.
pub struct MaxRuntimePolicy {
    max_runtime: Duration,
    started_at: Instant,
}

impl MaxRuntimePolicy {
    pub fn new(max_seconds: u64) -> Self {
        Self::started_at(max_seconds, Instant::now())
    }

    pub fn started_at(max_seconds: u64, started_at: Instant) -> Self {
        Self {
            max_runtime: Duration::from_secs(max_seconds),
            started_at,
        }
    }

    pub fn max_seconds(&self) -> u64 {
        self.max_runtime.as_secs()
    }
}

impl PolicyLayer for MaxRuntimePolicy {
    fn name(&self) -> &str {
        "MaxRuntimePolicy"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict> {
        let elapsed = ctx.now.saturating_duration_since(self.started_at);
        if elapsed > self.max_runtime {
            return Some(Verdict::new(
                self.name(),
                PolicyAction::Kill,
                format!(
                    "Maximum runtime exceeded ({:.1}s > {}s).",
                    elapsed.as_secs_f64(),
                    self.max_seconds()
                ),
            ));
        }
        None
    }
}

// ============================================================================
// Tool allow/deny lists
// ============================================================================

/// Set membership check on the tool name.
/// A tool in `denied` is always blocked; when `allowed` is present, any tool
/// outside it is blocked too.
pub struct AllowedToolsPolicy {
    allowed: Option<BTreeSet<String>>,
    denied: BTreeSet<String>,
}

impl AllowedToolsPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed: Some(allowed.into_iter().collect()),
            denied: BTreeSet::new(),
        }
    }

    /// Deny-list only: every tool not named is allowed
    pub fn deny_only(denied: Vec<String>) -> Self {
        Self {
            allowed: None,
            denied: denied.into_iter().collect(),
        }
    }

    pub fn with_denied(mut self, denied: Vec<String>) -> Self {
        self.denied = denied.into_iter().collect();
        self
    }
}

impl PolicyLayer for AllowedToolsPolicy {
    fn name(&self) -> &str {
        "AllowedToolsPolicy"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict> {
        let tool = ctx.tool_name();

        if self.denied.contains(tool) {
            return Some(Verdict::block(
                self.name(),
                format!("Tool '{}' is explicitly denied.", tool),
            ));
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(tool) {
                let list: Vec<&str> = allowed.iter().map(String::as_str).collect();
                return Some(Verdict::block(
                    self.name(),
                    format!(
                        "Tool '{}' is not in the allowed list: [{}].",
                        tool,
                        list.join(", ")
                    ),
                ));
            }
        }

        None
    }
}
