use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::{PolicyAction, ToolInvocation, Verdict};

/// Category of a policy event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Call blocked or trust downgraded
    PolicyViolation,
    /// Call held for a human decision
    ApprovalRequired,
    /// Session terminated
    AgentBlocked,
    /// Warning only, call proceeds
    Alert,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::PolicyViolation,
        EventKind::ApprovalRequired,
        EventKind::AgentBlocked,
        EventKind::Alert,
    ];

    pub fn for_action(action: PolicyAction) -> Self {
        match action {
            PolicyAction::Warn => EventKind::Alert,
            PolicyAction::RequestApproval => EventKind::ApprovalRequired,
            PolicyAction::Kill => EventKind::AgentBlocked,
            PolicyAction::Block | PolicyAction::Sandbox => EventKind::PolicyViolation,
        }
    }
}

/// Structured record of one non-allow decision
#[derive(Debug, Clone, Serialize)]
pub struct PolicyEvent {
    pub event: EventKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub policy: String,
    pub action: PolicyAction,
    pub tool: String,
    pub reason: String,
    pub request_id: Value,
    pub call_count: u64,
}

impl PolicyEvent {
    pub fn from_verdict(
        session_id: &str,
        verdict: &Verdict,
        invocation: &ToolInvocation,
        call_count: u64,
    ) -> Self {
        Self {
            event: EventKind::for_action(verdict.action),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            policy: verdict.policy_name.clone(),
            action: verdict.action,
            tool: invocation.tool_name.clone(),
            reason: verdict.reason.clone(),
            request_id: invocation.request_id.clone(),
            call_count,
        }
    }
}
