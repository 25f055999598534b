//! Minimal JSON-RPC 2.0 view of line-delimited protocol messages.

use brake_runtime::{ToolInvocation, Verdict};
use serde::Deserialize;
use serde_json::{json, Value};

/// Methods treated as tool invocations
pub const TOOL_CALL_METHODS: &[&str] = &["tools/call", "call_tool"];

/// Error code carried by synthesized rejections
pub const POLICY_ERROR_CODE: i64 = -32000;

/// Prefix of every rejection message
pub const REJECTION_TAG: &str = "[AgentBrake]";

/// Any JSON-RPC message (request, notification or response).
/// Unknown fields are ignored; only what adjudication needs is kept.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl RpcMessage {
    /// `None` for anything that is not a JSON object
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }

    pub fn is_tool_call(&self) -> bool {
        self.method
            .as_deref()
            .map(|m| TOOL_CALL_METHODS.contains(&m))
            .unwrap_or(false)
    }

    /// Tool name, arguments and id of a tool-call request
    pub fn tool_invocation(&self) -> Option<ToolInvocation> {
        if !self.is_tool_call() {
            return None;
        }
        let name = self
            .params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let arguments = self.params.get("arguments").cloned().unwrap_or(Value::Null);
        Some(ToolInvocation::new(
            name,
            arguments,
            self.id.clone().unwrap_or(Value::Null),
        ))
    }

    pub fn is_response(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    /// Error response, or a result flagged `isError`
    pub fn is_failure(&self) -> bool {
        if self.error.as_ref().is_some_and(|e| !e.is_null()) {
            return true;
        }
        self.result
            .as_ref()
            .and_then(|r| r.get("isError"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Error response sent upstream in place of a rejected call
pub fn rejection(id: &Value, verdict: &Verdict) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": POLICY_ERROR_CODE,
            "message": format!("{} {}: {}", REJECTION_TAG, verdict.action.label(), verdict.reason),
            "data": {
                "policy": verdict.policy_name,
                "action": verdict.action,
            }
        }
    })
}

/// Stable key for matching responses to requests
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use brake_runtime::PolicyAction;

    #[test]
    fn test_parse_tool_call() {
        let msg = RpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"read_file","arguments":{"path":"/tmp/a"}}}"#,
        )
        .unwrap();
        let inv = msg.tool_invocation().unwrap();
        assert_eq!(inv.tool_name, "read_file");
        assert_eq!(inv.arguments["path"], "/tmp/a");
        assert_eq!(inv.request_id, json!(3));
    }

    #[test]
    fn test_legacy_method_name_is_a_tool_call() {
        let msg = RpcMessage::parse(r#"{"id":"a","method":"call_tool","params":{"name":"x"}}"#)
            .unwrap();
        assert!(msg.is_tool_call());
        assert!(msg.tool_invocation().unwrap().arguments.is_empty());
    }

    #[test]
    fn test_other_methods_are_not_tool_calls() {
        let msg = RpcMessage::parse(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert!(!msg.is_tool_call());
        assert!(msg.tool_invocation().is_none());
    }

    #[test]
    fn test_non_object_lines_do_not_parse() {
        assert!(RpcMessage::parse("not json").is_none());
        assert!(RpcMessage::parse("42").is_none());
        assert!(RpcMessage::parse(r#"[{"method":"tools/call"}]"#).is_none());
    }

    #[test]
    fn test_failure_detection() {
        let err = RpcMessage::parse(r#"{"id":1,"error":{"code":-1,"message":"boom"}}"#).unwrap();
        assert!(err.is_response());
        assert!(err.is_failure());

        let flagged =
            RpcMessage::parse(r#"{"id":1,"result":{"isError":true,"content":[]}}"#).unwrap();
        assert!(flagged.is_failure());

        let ok = RpcMessage::parse(r#"{"id":1,"result":{"content":[]}}"#).unwrap();
        assert!(ok.is_response());
        assert!(!ok.is_failure());
    }

    #[test]
    fn test_rejection_shape() {
        let verdict = Verdict::new("ApprovalPolicy", PolicyAction::RequestApproval, "hold on");
        let response = rejection(&json!("req-9"), &verdict);

        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], "req-9");
        assert_eq!(response["error"]["code"], -32000);
        assert_eq!(
            response["error"]["message"],
            "[AgentBrake] REQUEST_APPROVAL: hold on"
        );
        assert_eq!(response["error"]["data"]["policy"], "ApprovalPolicy");
        assert_eq!(response["error"]["data"]["action"], "request_approval");
    }
}
