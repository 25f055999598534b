//! Per-session runtime state: call counter, cost estimate, trust level and
//! the audit trail of non-allow decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Estimated overhead charged to the session for every intercepted call.
const CALL_OVERHEAD_COST: f64 = 0.001;

/// Coarse privilege tier of the session. Policies may downgrade it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    #[default]
    Sandbox,
    Limited,
    Trusted,
    Privileged,
}

/// One entry in the session's decision history
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub policy: String,
}

/// Mutable session counters. Evaluators only ever see a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub call_count: u64,
    pub cost_accrued: f64,
    pub trust_level: TrustLevel,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub history: Vec<ActionRecord>,
}

impl SessionState {
    pub fn new(trust_level: TrustLevel) -> Self {
        Self {
            call_count: 0,
            cost_accrued: 0.0,
            trust_level,
            blocked: false,
            block_reason: None,
            history: Vec::new(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(TrustLevel::default())
    }
}

/// Single owner of the session state for one proxy process.
pub struct SessionTracker {
    session_id: String,
    state: SessionState,
}

impl SessionTracker {
    pub fn new(trust_level: TrustLevel) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::new(trust_level),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Count one tool-invocation attempt
    pub fn record_call(&mut self) {
        self.state.call_count += 1;
        self.state.cost_accrued += CALL_OVERHEAD_COST;
    }

    /// Copy of the current state handed to the policy chain
    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn set_blocked(&mut self, reason: &str) {
        self.state.blocked = true;
        self.state.block_reason = Some(reason.to_string());
    }

    pub fn update_trust(&mut self, level: TrustLevel) {
        if self.state.trust_level != level {
            tracing::info!(
                session_id = %self.session_id,
                from = ?self.state.trust_level,
                to = ?level,
                "Session trust level changed"
            );
        }
        self.state.trust_level = level;
    }

    pub fn log_action(&mut self, action: &str, policy: &str) {
        self.state.history.push(ActionRecord {
            timestamp: Utc::now(),
            action: action.to_string(),
            policy: policy.to_string(),
        });
    }

    /// Clear counters and history; the current trust level survives.
    pub fn reset(&mut self) {
        self.state = SessionState::new(self.state.trust_level);
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(TrustLevel::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_call_accrues_count_and_cost() {
        let mut tracker = SessionTracker::new(TrustLevel::Trusted);
        tracker.record_call();
        tracker.record_call();

        let state = tracker.snapshot();
        assert_eq!(state.call_count, 2);
        assert!((state.cost_accrued - 0.002).abs() < 1e-9);
        assert_eq!(state.trust_level, TrustLevel::Trusted);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut tracker = SessionTracker::default();
        let before = tracker.snapshot();
        tracker.record_call();
        tracker.set_blocked("limit reached");

        assert_eq!(before.call_count, 0);
        assert!(!before.blocked);
        assert!(tracker.state().blocked);
        assert_eq!(tracker.state().block_reason.as_deref(), Some("limit reached"));
    }

    #[test]
    fn test_reset_keeps_trust_level() {
        let mut tracker = SessionTracker::new(TrustLevel::Privileged);
        tracker.record_call();
        tracker.log_action("BLOCK", "MaxToolCallsPolicy");
        tracker.update_trust(TrustLevel::Sandbox);
        tracker.reset();

        let state = tracker.snapshot();
        assert_eq!(state.call_count, 0);
        assert!(state.history.is_empty());
        assert_eq!(state.trust_level, TrustLevel::Sandbox);
    }

    #[test]
    fn test_history_is_ordered() {
        let mut tracker = SessionTracker::default();
        tracker.log_action("WARN", "RateLimitPolicy");
        tracker.log_action("BLOCK", "BudgetPolicy");

        let policies: Vec<_> = tracker
            .state()
            .history
            .iter()
            .map(|r| r.policy.as_str())
            .collect();
        assert_eq!(policies, vec!["RateLimitPolicy", "BudgetPolicy"]);
    }
}
