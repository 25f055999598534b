//! Policy chain: ordered evaluators that adjudicate every tool invocation
//! before it reaches the backend.

pub mod approval;
pub mod budget;
pub mod circuit_breaker;
pub mod config;
pub mod firewall;
pub mod limits;
pub mod rate_limit;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::SessionState;

pub use approval::{ApprovalPolicy, ApprovalRequest, ApprovalState};
pub use budget::BudgetPolicy;
pub use circuit_breaker::{CircuitBreakerPolicy, CircuitStatus};
pub use config::{
    BudgetConfig, CircuitBreakerConfig, GlobalConfig, LimitsConfig, PoliciesConfig,
    PolicyHandles, RateLimitConfig, SecurityConfig,
};
pub use firewall::{ArgumentPatterns, GranularAccessPolicy, GranularRule};
pub use limits::{AllowedToolsPolicy, MaxRuntimePolicy, MaxToolCallsPolicy};
pub use rate_limit::{RateLimitPolicy, RateSnapshot};

/// Action requested by a policy. Allow is the absence of a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Warn,
    Block,
    Kill,
    Sandbox,
    RequestApproval,
}

impl PolicyAction {
    /// Upper-case label used in history entries and rejection messages
    pub fn label(&self) -> &'static str {
        match self {
            PolicyAction::Warn => "WARN",
            PolicyAction::Block => "BLOCK",
            PolicyAction::Kill => "KILL",
            PolicyAction::Sandbox => "SANDBOX",
            PolicyAction::RequestApproval => "REQUEST_APPROVAL",
        }
    }

    /// Whether the chain stops at this action
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PolicyAction::Warn)
    }

    /// Whether the invocation still reaches the backend
    pub fn forwards(&self) -> bool {
        matches!(self, PolicyAction::Warn | PolicyAction::Sandbox)
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyAction::Warn => "warn",
            PolicyAction::Block => "block",
            PolicyAction::Kill => "kill",
            PolicyAction::Sandbox => "sandbox",
            PolicyAction::RequestApproval => "request_approval",
        };
        f.write_str(s)
    }
}

/// Non-allow result of a single policy evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub policy_name: String,
    pub action: PolicyAction,
    pub reason: String,
}

impl Verdict {
    pub fn new(policy_name: &str, action: PolicyAction, reason: impl Into<String>) -> Self {
        Self {
            policy_name: policy_name.to_string(),
            action,
            reason: reason.into(),
        }
    }

    pub fn warn(policy_name: &str, reason: impl Into<String>) -> Self {
        Self::new(policy_name, PolicyAction::Warn, reason)
    }

    pub fn block(policy_name: &str, reason: impl Into<String>) -> Self {
        Self::new(policy_name, PolicyAction::Block, reason)
    }
}

/// A tool-invocation request extracted from one protocol message
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    /// JSON-RPC id (string, number or null), echoed in rejections
    pub request_id: Value,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Value, request_id: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            tool_name: tool_name.into(),
            arguments,
            request_id,
        }
    }
}

/// Context passed to each policy for evaluation
pub struct PolicyContext<'a> {
    pub invocation: &'a ToolInvocation,
    pub state: &'a SessionState,
    /// Wall-clock read taken once per adjudication
    pub now: Instant,
}

impl<'a> PolicyContext<'a> {
    pub fn new(invocation: &'a ToolInvocation, state: &'a SessionState) -> Self {
        Self {
            invocation,
            state,
            now: Instant::now(),
        }
    }

    pub fn at(mut self, now: Instant) -> Self {
        self.now = now;
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.invocation.tool_name
    }
}

/// Individual policy evaluator.
/// Evaluators keep their own state behind interior mutability so the chain
/// and collaborators holding an `Arc` can share one instance.
pub trait PolicyLayer: Send + Sync {
    /// Policy name for logging and rejection payloads
    fn name(&self) -> &str;

    /// `None` means allow
    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict>;
}

/// Aggregate result of running the chain over one invocation
#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    /// Warn verdicts collected before the chain stopped (or completed)
    pub warnings: Vec<Verdict>,
    /// First terminal verdict, if any
    pub verdict: Option<Verdict>,
}

impl ChainOutcome {
    pub fn is_allow(&self) -> bool {
        self.verdict.is_none() && self.warnings.is_empty()
    }

    /// Forward unless a block, kill or approval gate stopped the chain
    pub fn forwards(&self) -> bool {
        self.verdict.as_ref().map_or(true, |v| v.action.forwards())
    }
}

/// Evaluates policies in configuration order.
/// Warnings accumulate; any other verdict stops the chain.
pub struct PolicyChain {
    layers: Vec<Arc<dyn PolicyLayer>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Append a policy to the end of the chain
    pub fn add_layer(mut self, layer: Arc<dyn PolicyLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name().to_string()).collect()
    }

    pub fn evaluate(&self, ctx: &PolicyContext) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();

        for layer in &self.layers {
            let Some(verdict) = layer.evaluate(ctx) else {
                continue;
            };

            tracing::debug!(
                policy = layer.name(),
                action = %verdict.action,
                tool = %ctx.tool_name(),
                reason = %verdict.reason,
                "Policy verdict"
            );

            if verdict.action.is_terminal() {
                outcome.verdict = Some(verdict);
                break;
            }
            outcome.warnings.push(verdict);
        }

        outcome
    }
}

impl Default for PolicyChain {
    fn default() -> Self {
        Self::new()
    }
}
