//! Configuration for the policy chain and the builder that turns it into
//! evaluators.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::{
    AllowedToolsPolicy, ApprovalPolicy, BudgetPolicy, CircuitBreakerPolicy, GranularAccessPolicy,
    GranularRule, MaxRuntimePolicy, MaxToolCallsPolicy, PolicyAction, PolicyChain,
    RateLimitPolicy,
};

/// Call quota installed when no policy is configured at all
const FALLBACK_MAX_TOOL_CALLS: u64 = 10;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PoliciesConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default)]
    pub budget: Option<BudgetConfig>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Session-wide violation action as written in config files. Granular
    /// rules without an `action` block regardless of this setting.
    #[serde(default = "default_on_violation")]
    pub on_violation: PolicyAction,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub max_tool_calls: Option<u64>,

    #[serde(default)]
    pub max_runtime_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub calls_per_window: usize,

    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    pub max_cost: f64,

    #[serde(default = "default_cost_per_call")]
    pub default_cost_per_call: f64,

    #[serde(default)]
    pub tool_costs: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,

    #[serde(default)]
    pub denied_tools: Vec<String>,

    #[serde(default)]
    pub granular_rules: Vec<GranularRule>,

    #[serde(default)]
    pub require_approval: Vec<String>,
}

fn default_on_violation() -> PolicyAction {
    PolicyAction::Block
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cost_per_call() -> f64 {
    0.01
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_reset_timeout() -> u64 {
    60
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            on_violation: default_on_violation(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_seconds: default_reset_timeout(),
        }
    }
}

/// Shared handles to evaluators with operations beyond `evaluate`
#[derive(Clone, Default)]
pub struct PolicyHandles {
    pub circuit_breaker: Option<Arc<CircuitBreakerPolicy>>,
    pub budget: Option<Arc<BudgetPolicy>>,
    pub approval: Option<Arc<ApprovalPolicy>>,
}

impl PoliciesConfig {
    /// Build the chain in fixed order: quota, runtime, tool lists, firewall,
    /// rate limit, circuit breaker, budget, approval.
    /// Invalid settings fail here, before any message is processed.
    pub fn build(&self) -> Result<(PolicyChain, PolicyHandles)> {
        let mut chain = PolicyChain::new();
        let mut handles = PolicyHandles::default();

        if let Some(max_calls) = self.limits.max_tool_calls {
            chain = chain.add_layer(Arc::new(MaxToolCallsPolicy::new(max_calls)));
        }

        if let Some(max_seconds) = self.limits.max_runtime_seconds {
            chain = chain.add_layer(Arc::new(MaxRuntimePolicy::new(max_seconds)));
        }

        match &self.security.allowed_tools {
            Some(allowed) => {
                let policy = AllowedToolsPolicy::new(allowed.clone())
                    .with_denied(self.security.denied_tools.clone());
                chain = chain.add_layer(Arc::new(policy));
            }
            None if !self.security.denied_tools.is_empty() => {
                let policy = AllowedToolsPolicy::deny_only(self.security.denied_tools.clone());
                chain = chain.add_layer(Arc::new(policy));
            }
            None => {}
        }

        if !self.security.granular_rules.is_empty() {
            let policy = GranularAccessPolicy::new(&self.security.granular_rules)?;
            chain = chain.add_layer(Arc::new(policy));
        }

        if let Some(rate) = &self.rate_limit {
            if rate.calls_per_window == 0 || rate.window_seconds == 0 {
                bail!("policies.rate_limit: calls_per_window and window_seconds must be positive");
            }
            chain = chain.add_layer(Arc::new(RateLimitPolicy::new(
                rate.calls_per_window,
                rate.window_seconds,
            )));
        }

        if let Some(breaker) = &self.circuit_breaker {
            if breaker.failure_threshold == 0 {
                bail!("policies.circuit_breaker.failure_threshold must be positive");
            }
            let policy = Arc::new(CircuitBreakerPolicy::new(
                breaker.failure_threshold,
                breaker.reset_timeout_seconds,
            ));
            handles.circuit_breaker = Some(policy.clone());
            chain = chain.add_layer(policy);
        }

        if let Some(budget) = &self.budget {
            if !(budget.max_cost > 0.0) {
                bail!("policies.budget.max_cost must be positive");
            }
            if budget.default_cost_per_call < 0.0 || budget.tool_costs.values().any(|c| *c < 0.0)
            {
                bail!("policies.budget: costs must not be negative");
            }
            let policy = Arc::new(
                BudgetPolicy::new(budget.max_cost, budget.default_cost_per_call)
                    .with_tool_costs(budget.tool_costs.clone()),
            );
            handles.budget = Some(policy.clone());
            chain = chain.add_layer(policy);
        }

        if !self.security.require_approval.is_empty() {
            let policy = Arc::new(ApprovalPolicy::new(self.security.require_approval.clone()));
            handles.approval = Some(policy.clone());
            chain = chain.add_layer(policy);
        }

        if chain.is_empty() {
            chain = chain.add_layer(Arc::new(MaxToolCallsPolicy::new(FALLBACK_MAX_TOOL_CALLS)));
        }

        Ok((chain, handles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyContext, ToolInvocation};
    use crate::session::SessionState;
    use serde_json::json;

    fn from_json(value: serde_json::Value) -> PoliciesConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_config_installs_fallback_quota() {
        let (chain, handles) = PoliciesConfig::default().build().unwrap();
        assert_eq!(chain.names(), vec!["MaxToolCallsPolicy"]);
        assert!(handles.approval.is_none());
    }

    #[test]
    fn test_full_config_builds_in_fixed_order() {
        let config = from_json(json!({
            "limits": {"max_tool_calls": 50, "max_runtime_seconds": 300},
            "rate_limit": {"calls_per_window": 10},
            "budget": {"max_cost": 1.0, "tool_costs": {"send_email": 0.05}},
            "circuit_breaker": {},
            "security": {
                "allowed_tools": ["calculator", "read_file", "send_email"],
                "require_approval": ["send_email"],
                "granular_rules": [
                    {"tool": "read_file", "deny_if": {"arguments": {"path": ".*passwd.*"}}}
                ]
            }
        }));
        let (chain, handles) = config.build().unwrap();
        assert_eq!(
            chain.names(),
            vec![
                "MaxToolCallsPolicy",
                "MaxRuntimePolicy",
                "AllowedToolsPolicy",
                "GranularAccessPolicy",
                "RateLimitPolicy",
                "CircuitBreakerPolicy",
                "BudgetPolicy",
                "ApprovalPolicy",
            ]
        );
        assert!(handles.circuit_breaker.is_some());
        assert!(handles.budget.is_some());
        assert!(handles.approval.is_some());
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = from_json(json!({
            "rate_limit": {"calls_per_window": 5},
            "budget": {"max_cost": 2.0},
            "circuit_breaker": {}
        }));
        assert_eq!(config.global.on_violation, PolicyAction::Block);
        assert_eq!(config.rate_limit.unwrap().window_seconds, 60);
        assert_eq!(config.budget.unwrap().default_cost_per_call, 0.01);
        let breaker = config.circuit_breaker.unwrap();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.reset_timeout_seconds, 60);
    }

    #[test]
    fn test_denied_tools_without_allow_list() {
        let config = from_json(json!({"security": {"denied_tools": ["shell"]}}));
        let (chain, _) = config.build().unwrap();
        assert_eq!(chain.names(), vec!["AllowedToolsPolicy"]);
    }

    #[test]
    fn test_invalid_regex_fails_build() {
        let config = from_json(json!({
            "security": {"granular_rules": [
                {"tool": "read_file", "allow_if": {"arguments": {"path": "(["}}}
            ]}
        }));
        assert!(config.build().is_err());
    }

    #[test]
    fn test_zero_limits_fail_build() {
        let config = from_json(json!({"rate_limit": {"calls_per_window": 0}}));
        assert!(config.build().is_err());

        let config = from_json(json!({"budget": {"max_cost": 0.0}}));
        assert!(config.build().is_err());

        let config = from_json(json!({"circuit_breaker": {"failure_threshold": 0}}));
        assert!(config.build().is_err());
    }

    #[test]
    fn test_rule_without_action_blocks_regardless_of_on_violation() {
        let config = from_json(json!({
            "global": {"on_violation": "warn"},
            "security": {"granular_rules": [
                {"tool": "read_file", "deny_if": {"arguments": {"path": ".*passwd.*"}}}
            ]}
        }));
        let (chain, _) = config.build().unwrap();

        let inv = ToolInvocation::new("read_file", json!({"path": "/etc/passwd"}), json!(1));
        let state = SessionState::default();
        let outcome = chain.evaluate(&PolicyContext::new(&inv, &state));

        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.verdict.unwrap().action, PolicyAction::Block);
    }
}
