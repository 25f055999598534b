//! Human-in-the-loop approval gate for high-risk tools.
//!
//! Requests are keyed by a fingerprint of `(tool, arguments)`. The first call
//! opens a pending request; repeats are blocked while it is pending; an
//! approval lets exactly one matching call through and is then consumed.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::{PolicyAction, PolicyContext, PolicyLayer, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool: String,
    pub arguments: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub state: ApprovalState,
}

pub struct ApprovalPolicy {
    tools: HashSet<String>,
    requests: Mutex<HashMap<String, ApprovalRequest>>,
}

impl ApprovalPolicy {
    pub fn new(tools: Vec<String>) -> Self {
        Self {
            tools: tools.into_iter().collect(),
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// SHA-256 over `tool:arguments`. serde_json maps serialize with sorted
    /// keys, so equal argument sets always produce the same fingerprint.
    pub fn fingerprint(tool: &str, arguments: &Map<String, Value>) -> String {
        let serialized = Value::Object(arguments.clone()).to_string();
        let digest = Sha256::digest(format!("{}:{}", tool, serialized).as_bytes());
        format!("{:x}", digest)
    }

    /// Move a pending request to approved. False if no such pending request.
    pub fn approve(&self, id: &str) -> bool {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        match requests.get_mut(id) {
            Some(request) if request.state == ApprovalState::Pending => {
                request.state = ApprovalState::Approved;
                tracing::info!(id, tool = %request.tool, "Approval granted");
                true
            }
            _ => false,
        }
    }

    /// Drop a pending request. The next identical call asks again.
    pub fn deny(&self, id: &str) -> bool {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let is_pending = matches!(
            requests.get(id),
            Some(request) if request.state == ApprovalState::Pending
        );
        if !is_pending {
            return false;
        }
        if let Some(request) = requests.remove(id) {
            tracing::info!(id, tool = %request.tool, "Approval denied");
        }
        true
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<_> = requests
            .values()
            .filter(|r| r.state == ApprovalState::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }
}

impl PolicyLayer for ApprovalPolicy {
    fn name(&self) -> &str {
        "ApprovalPolicy"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict> {
        let tool = ctx.tool_name();
        if !self.tools.contains(tool) {
            return None;
        }

        let id = Self::fingerprint(tool, &ctx.invocation.arguments);
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());

        match requests.get(&id).map(|r| r.state) {
            Some(ApprovalState::Approved) => {
                requests.remove(&id);
                None
            }
            Some(ApprovalState::Pending) => Some(Verdict::block(
                self.name(),
                format!("Awaiting approval for '{}'. Request pending.", tool),
            )),
            None => {
                requests.insert(
                    id.clone(),
                    ApprovalRequest {
                        id: id.clone(),
                        tool: tool.to_string(),
                        arguments: ctx.invocation.arguments.clone(),
                        created_at: Utc::now(),
                        state: ApprovalState::Pending,
                    },
                );
                Some(Verdict::new(
                    self.name(),
                    PolicyAction::RequestApproval,
                    format!(
                        "Tool '{}' requires human approval. Approve or deny request {}.",
                        tool, id
                    ),
                ))
            }
        }
    }
}
