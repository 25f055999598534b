//! Estimated-cost ledger. Warns at 80% of the budget, blocks past 100%.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{PolicyContext, PolicyLayer, Verdict};

const WARN_PERCENT: f64 = 80.0;

pub struct BudgetPolicy {
    max_budget: f64,
    default_cost: f64,
    tool_costs: HashMap<String, f64>,
    spend: Mutex<f64>,
}

impl BudgetPolicy {
    pub fn new(max_budget: f64, default_cost: f64) -> Self {
        Self {
            max_budget,
            default_cost,
            tool_costs: HashMap::new(),
            spend: Mutex::new(0.0),
        }
    }

    /// Per-tool cost overrides
    pub fn with_tool_costs(mut self, tool_costs: HashMap<String, f64>) -> Self {
        self.tool_costs = tool_costs;
        self
    }

    fn cost_of(&self, tool: &str) -> f64 {
        self.tool_costs
            .get(tool)
            .copied()
            .unwrap_or(self.default_cost)
    }

    pub fn spend(&self) -> f64 {
        *self.spend.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn remaining(&self) -> f64 {
        (self.max_budget - self.spend()).max(0.0)
    }

    pub fn percent_used(&self) -> f64 {
        self.spend() / self.max_budget * 100.0
    }

    pub fn reset(&self) {
        *self.spend.lock().unwrap_or_else(|e| e.into_inner()) = 0.0;
    }
}

impl PolicyLayer for BudgetPolicy {
    fn name(&self) -> &str {
        "BudgetPolicy"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict> {
        let tool = ctx.tool_name();
        let cost = self.cost_of(tool);
        let mut spend = self.spend.lock().unwrap_or_else(|e| e.into_inner());
        let projected = *spend + cost;

        if projected > self.max_budget {
            return Some(Verdict::block(
                self.name(),
                format!(
                    "Budget exceeded. Spent: ${:.4}, Limit: ${:.2}. Tool '{}' would add ${:.4}.",
                    *spend, self.max_budget, tool, cost
                ),
            ));
        }

        *spend = projected;

        let percent_used = projected / self.max_budget * 100.0;
        if percent_used >= WARN_PERCENT {
            return Some(Verdict::warn(
                self.name(),
                format!(
                    "Budget at {:.1}%. Spent: ${:.4} of ${:.2}.",
                    percent_used, projected, self.max_budget
                ),
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyAction, ToolInvocation};
    use crate::session::SessionState;
    use serde_json::json;

    fn eval(policy: &BudgetPolicy, tool: &str) -> Option<Verdict> {
        let inv = ToolInvocation::new(tool, json!({}), json!(1));
        let state = SessionState::default();
        policy.evaluate(&PolicyContext::new(&inv, &state))
    }

    #[test]
    fn test_allows_under_budget() {
        let policy = BudgetPolicy::new(1.0, 0.01);
        assert!(eval(&policy, "calculator").is_none());
    }

    #[test]
    fn test_warns_at_eighty_percent() {
        let policy = BudgetPolicy::new(0.10, 0.01);
        for _ in 0..7 {
            assert!(eval(&policy, "calculator").is_none());
        }
        // the 8th call reaches 80%
        let verdict = eval(&policy, "calculator").unwrap();
        assert_eq!(verdict.action, PolicyAction::Warn);
        assert!((policy.spend() - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_blocks_when_exceeded() {
        let policy = BudgetPolicy::new(0.05, 0.01);
        for _ in 0..5 {
            let verdict = eval(&policy, "calculator");
            assert!(verdict.map_or(true, |v| v.action == PolicyAction::Warn));
        }

        let verdict = eval(&policy, "calculator").unwrap();
        assert_eq!(verdict.action, PolicyAction::Block);
        assert!(verdict.reason.contains("Budget exceeded"));
        assert!(verdict.reason.contains("would add $0.0100"));
        // blocked calls are not charged
        assert!((policy.spend() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_tracks_spend_and_percent() {
        let policy = BudgetPolicy::new(1.0, 0.01);
        eval(&policy, "calculator");
        eval(&policy, "calculator");
        assert!((policy.spend() - 0.02).abs() < 1e-9);
        assert!((policy.percent_used() - 2.0).abs() < 1e-9);
        assert!((policy.remaining() - 0.98).abs() < 1e-9);
    }

    #[test]
    fn test_tool_cost_override() {
        let costs = HashMap::from([("send_email".to_string(), 0.5)]);
        let policy = BudgetPolicy::new(1.0, 0.01).with_tool_costs(costs);
        eval(&policy, "send_email");
        assert!((policy.spend() - 0.5).abs() < 1e-9);
        eval(&policy, "calculator");
        assert!((policy.spend() - 0.51).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_spend() {
        let policy = BudgetPolicy::new(1.0, 0.01);
        eval(&policy, "calculator");
        policy.reset();
        assert_eq!(policy.spend(), 0.0);
    }
}
