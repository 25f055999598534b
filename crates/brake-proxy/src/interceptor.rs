//! Adjudication of upstream messages against the session and policy chain.

use std::sync::Arc;
use std::time::Instant;

use brake_runtime::{
    NotifierRegistry, PolicyAction, PolicyChain, PolicyContext, PolicyEvent, SessionTracker,
    ToolInvocation, TrustLevel, Verdict,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::jsonrpc::{rejection, RpcMessage};
use crate::outcome::OutcomeObserver;

/// What to do with one upstream line
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Pass the original line to the backend
    Forward,
    /// Answer upstream with `response`; the backend never sees the call
    Reject { response: Value, verdict: Verdict },
    /// Answer upstream with `response`, then end the session
    Kill { response: Value, verdict: Verdict },
}

/// Event queue feeding the background dispatcher
struct Notifications {
    registry: Arc<NotifierRegistry>,
    queue: mpsc::UnboundedSender<PolicyEvent>,
}

/// Owns the session tracker and policy chain. Messages are adjudicated one
/// at a time, in arrival order.
pub struct Interceptor {
    tracker: SessionTracker,
    chain: PolicyChain,
    notifications: Option<Notifications>,
    dispatcher: Option<JoinHandle<()>>,
    observer: Option<Arc<OutcomeObserver>>,
}

impl Interceptor {
    pub fn new(tracker: SessionTracker, chain: PolicyChain) -> Self {
        Self {
            tracker,
            chain,
            notifications: None,
            dispatcher: None,
            observer: None,
        }
    }

    /// Deliver policy events to `registry` from a background task, in the
    /// order they occur. Must be called inside a tokio runtime.
    pub fn with_notifiers(mut self, registry: Arc<NotifierRegistry>) -> Self {
        let (queue, events) = mpsc::unbounded_channel();
        self.dispatcher = Some(tokio::spawn(dispatch_events(registry.clone(), events)));
        self.notifications = Some(Notifications { registry, queue });
        self
    }

    /// Handle of the event dispatcher. It completes once this interceptor is
    /// dropped and every queued event has been delivered.
    pub fn take_dispatcher(&mut self) -> Option<JoinHandle<()>> {
        self.dispatcher.take()
    }

    pub fn with_observer(mut self, observer: Arc<OutcomeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Lines that are not JSON-RPC objects are forwarded untouched
    pub fn handle_line(&mut self, line: &str) -> Disposition {
        match RpcMessage::parse(line) {
            Some(message) => self.adjudicate(&message),
            None => Disposition::Forward,
        }
    }

    pub fn adjudicate(&mut self, message: &RpcMessage) -> Disposition {
        self.adjudicate_at(message, Instant::now())
    }

    pub fn adjudicate_at(&mut self, message: &RpcMessage, now: Instant) -> Disposition {
        let Some(invocation) = message.tool_invocation() else {
            return Disposition::Forward;
        };

        self.tracker.record_call();
        let snapshot = self.tracker.snapshot();
        let ctx = PolicyContext::new(&invocation, &snapshot).at(now);
        let outcome = self.chain.evaluate(&ctx);

        for warning in &outcome.warnings {
            self.record(warning, &invocation);
        }

        let Some(verdict) = outcome.verdict else {
            self.forwarded(&invocation);
            return Disposition::Forward;
        };

        self.record(&verdict, &invocation);

        match verdict.action {
            PolicyAction::Warn | PolicyAction::Sandbox => {
                self.forwarded(&invocation);
                Disposition::Forward
            }
            PolicyAction::Block | PolicyAction::RequestApproval => Disposition::Reject {
                response: rejection(&invocation.request_id, &verdict),
                verdict,
            },
            PolicyAction::Kill => Disposition::Kill {
                response: rejection(&invocation.request_id, &verdict),
                verdict,
            },
        }
    }

    fn forwarded(&self, invocation: &ToolInvocation) {
        if let Some(observer) = &self.observer {
            observer.track(&invocation.request_id, &invocation.tool_name);
        }
    }

    /// Apply a verdict to the session, log it and emit an event
    fn record(&mut self, verdict: &Verdict, invocation: &ToolInvocation) {
        let call_count = self.tracker.state().call_count;

        match verdict.action {
            PolicyAction::Warn => {
                warn!(
                    policy = %verdict.policy_name,
                    tool = %invocation.tool_name,
                    reason = %verdict.reason,
                    call_count,
                    "Policy warning"
                );
            }
            PolicyAction::Sandbox => {
                self.tracker.update_trust(TrustLevel::Sandbox);
                warn!(
                    policy = %verdict.policy_name,
                    tool = %invocation.tool_name,
                    reason = %verdict.reason,
                    "Session downgraded to sandbox"
                );
            }
            PolicyAction::RequestApproval => {
                info!(
                    policy = %verdict.policy_name,
                    tool = %invocation.tool_name,
                    request_id = %invocation.request_id,
                    reason = %verdict.reason,
                    "Tool call held for approval"
                );
            }
            PolicyAction::Block => {
                self.tracker.set_blocked(&verdict.reason);
                warn!(
                    policy = %verdict.policy_name,
                    tool = %invocation.tool_name,
                    request_id = %invocation.request_id,
                    reason = %verdict.reason,
                    call_count,
                    "Policy violation: call blocked"
                );
            }
            PolicyAction::Kill => {
                self.tracker.set_blocked(&verdict.reason);
                error!(
                    policy = %verdict.policy_name,
                    tool = %invocation.tool_name,
                    reason = %verdict.reason,
                    call_count,
                    "Policy violation: terminating session"
                );
            }
        }

        self.tracker
            .log_action(verdict.action.label(), &verdict.policy_name);
        self.notify(verdict, invocation, call_count);
    }

    fn notify(&self, verdict: &Verdict, invocation: &ToolInvocation, call_count: u64) {
        let Some(notifications) = &self.notifications else {
            return;
        };
        let event =
            PolicyEvent::from_verdict(self.tracker.session_id(), verdict, invocation, call_count);
        if !notifications.registry.has_notifiers(event.event) {
            return;
        }
        if notifications.queue.send(event).is_err() {
            debug!("Event dispatcher stopped; dropping event");
        }
    }
}

async fn dispatch_events(
    registry: Arc<NotifierRegistry>,
    mut events: mpsc::UnboundedReceiver<PolicyEvent>,
) {
    while let Some(event) = events.recv().await {
        registry.dispatch(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brake_runtime::policy::{AllowedToolsPolicy, MaxToolCallsPolicy, RateLimitPolicy};
    use brake_runtime::PoliciesConfig;
    use serde_json::json;

    fn call_line(id: u64, tool: &str, args: Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": tool, "arguments": args}
        })
        .to_string()
    }

    fn interceptor(chain: PolicyChain) -> Interceptor {
        Interceptor::new(SessionTracker::new(TrustLevel::Trusted), chain)
    }

    #[test]
    fn test_non_protocol_lines_forward() {
        let mut icpt = interceptor(PolicyChain::new());
        assert_eq!(icpt.handle_line("hello backend"), Disposition::Forward);
        assert_eq!(icpt.tracker().state().call_count, 0);
    }

    #[test]
    fn test_non_tool_methods_are_not_counted() {
        let mut icpt =
            interceptor(PolicyChain::new().add_layer(Arc::new(MaxToolCallsPolicy::new(0))));
        let line = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}).to_string();
        assert_eq!(icpt.handle_line(&line), Disposition::Forward);
        assert_eq!(icpt.tracker().state().call_count, 0);
    }

    #[test]
    fn test_call_is_counted_before_evaluation() {
        // the attempt is recorded first, so a quota of 2 admits one call
        let mut icpt =
            interceptor(PolicyChain::new().add_layer(Arc::new(MaxToolCallsPolicy::new(2))));
        assert_eq!(
            icpt.handle_line(&call_line(1, "calculator", json!({}))),
            Disposition::Forward
        );
        assert!(matches!(
            icpt.handle_line(&call_line(2, "calculator", json!({}))),
            Disposition::Reject { .. }
        ));
        assert_eq!(icpt.tracker().state().call_count, 2);
    }

    #[test]
    fn test_block_synthesizes_rejection_and_marks_session() {
        let mut icpt = interceptor(
            PolicyChain::new().add_layer(Arc::new(AllowedToolsPolicy::new(vec![
                "calculator".into(),
            ]))),
        );
        let disposition = icpt.handle_line(&call_line(7, "dangerous_tool", json!({})));

        let Disposition::Reject { response, verdict } = disposition else {
            panic!("expected rejection");
        };
        assert_eq!(verdict.policy_name, "AllowedToolsPolicy");
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["data"]["action"], "block");

        let state = icpt.tracker().state();
        assert!(state.blocked);
        assert_eq!(state.history.last().unwrap().action, "BLOCK");
    }

    #[test]
    fn test_warnings_forward_and_are_recorded() {
        let mut icpt =
            interceptor(PolicyChain::new().add_layer(Arc::new(RateLimitPolicy::new(1, 60))));
        let now = Instant::now();
        let msg = RpcMessage::parse(&call_line(1, "calculator", json!({}))).unwrap();

        // limit 1: the first call is in the empty window and passes
        assert_eq!(icpt.adjudicate_at(&msg, now), Disposition::Forward);
        assert!(matches!(
            icpt.adjudicate_at(&msg, now),
            Disposition::Reject { .. }
        ));

        let config: PoliciesConfig =
            serde_json::from_value(json!({"rate_limit": {"calls_per_window": 5}})).unwrap();
        let (chain, _) = config.build().unwrap();
        let mut icpt = interceptor(chain);
        // the fifth call lands in the 80% band
        for _ in 0..5 {
            assert_eq!(icpt.adjudicate_at(&msg, now), Disposition::Forward);
        }
        let warns = icpt
            .tracker()
            .state()
            .history
            .iter()
            .filter(|r| r.action == "WARN")
            .count();
        assert_eq!(warns, 1);
        assert!(!icpt.tracker().state().blocked);
    }

    #[test]
    fn test_sandbox_downgrades_trust_and_forwards() {
        let config: PoliciesConfig = serde_json::from_value(json!({
            "security": {"granular_rules": [
                {"tool": "read_file", "action": "sandbox", "deny_if": {"arguments": {"path": "^/etc/"}}}
            ]}
        }))
        .unwrap();
        let (chain, _) = config.build().unwrap();
        let mut icpt = interceptor(chain);

        let disposition = icpt.handle_line(&call_line(1, "read_file", json!({"path": "/etc/hosts"})));
        assert_eq!(disposition, Disposition::Forward);
        assert_eq!(icpt.tracker().state().trust_level, TrustLevel::Sandbox);
        assert!(!icpt.tracker().state().blocked);
    }

    #[test]
    fn test_kill_disposition() {
        let config: PoliciesConfig = serde_json::from_value(json!({
            "security": {"granular_rules": [
                {"tool": "shell", "action": "kill", "deny_if": {"arguments": {"cmd": "rm -rf"}}}
            ]}
        }))
        .unwrap();
        let (chain, _) = config.build().unwrap();
        let mut icpt = interceptor(chain);

        let disposition = icpt.handle_line(&call_line(4, "shell", json!({"cmd": "rm -rf /"})));
        let Disposition::Kill { response, verdict } = disposition else {
            panic!("expected kill");
        };
        assert_eq!(verdict.action, PolicyAction::Kill);
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("[AgentBrake] KILL:"));
    }

    #[test]
    fn test_approval_round_trip() {
        let config: PoliciesConfig = serde_json::from_value(json!({
            "limits": {"max_tool_calls": 100},
            "security": {"require_approval": ["send_email"]}
        }))
        .unwrap();
        let (chain, handles) = config.build().unwrap();
        let approval = handles.approval.unwrap();
        let mut icpt = interceptor(chain);
        let line = call_line(1, "send_email", json!({"to": "ceo@example.com"}));

        let Disposition::Reject { verdict, .. } = icpt.handle_line(&line) else {
            panic!("expected approval request");
        };
        assert_eq!(verdict.action, PolicyAction::RequestApproval);
        assert!(!icpt.tracker().state().blocked);

        let Disposition::Reject { verdict, .. } = icpt.handle_line(&line) else {
            panic!("expected pending block");
        };
        assert_eq!(verdict.action, PolicyAction::Block);

        let pending = approval.pending();
        assert_eq!(pending.len(), 1);
        assert!(approval.approve(&pending[0].id));

        assert_eq!(icpt.handle_line(&line), Disposition::Forward);
        assert!(matches!(
            icpt.handle_line(&line),
            Disposition::Reject { .. }
        ));
    }

    #[tokio::test]
    async fn test_events_reach_notifiers() {
        use async_trait::async_trait;
        use brake_runtime::{EventKind, Notifier};

        struct ChannelNotifier(mpsc::UnboundedSender<PolicyEvent>);

        #[async_trait]
        impl Notifier for ChannelNotifier {
            fn name(&self) -> &str {
                "channel"
            }
            async fn notify(&self, event: &PolicyEvent) -> anyhow::Result<()> {
                let _ = self.0.send(event.clone());
                Ok(())
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = NotifierRegistry::new();
        registry.register(Arc::new(ChannelNotifier(tx)));

        let mut icpt = interceptor(
            PolicyChain::new().add_layer(Arc::new(AllowedToolsPolicy::new(vec![]))),
        )
        .with_notifiers(Arc::new(registry));
        icpt.handle_line(&call_line(3, "shell", json!({})));

        icpt.handle_line(&call_line(4, "shell", json!({})));
        let dispatcher = icpt.take_dispatcher().unwrap();
        drop(icpt);

        // dropping the interceptor lets the dispatcher finish its queue
        dispatcher.await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, EventKind::PolicyViolation);
        assert_eq!(event.tool, "shell");
        assert_eq!(event.request_id, json!(3));
        assert_eq!(rx.recv().await.unwrap().request_id, json!(4));
    }
}
