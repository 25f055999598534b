//! Feeds backend call outcomes into the circuit breaker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use brake_runtime::CircuitBreakerPolicy;
use serde_json::Value;
use tracing::debug;

use crate::jsonrpc::{id_key, RpcMessage};

/// Remembers which tool each forwarded request id targets and records the
/// matching response as a success or failure.
pub struct OutcomeObserver {
    circuit: Arc<CircuitBreakerPolicy>,
    in_flight: Mutex<HashMap<String, String>>,
}

impl OutcomeObserver {
    pub fn new(circuit: Arc<CircuitBreakerPolicy>) -> Self {
        Self {
            circuit,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Called when a tool call is forwarded to the backend
    pub fn track(&self, id: &Value, tool: &str) {
        if id.is_null() {
            return;
        }
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.insert(id_key(id), tool.to_string());
    }

    /// Inspect one backend output line. The line itself is never modified.
    pub fn observe_line(&self, line: &[u8]) {
        let Ok(text) = std::str::from_utf8(line) else {
            return;
        };
        let Some(message) = RpcMessage::parse(text.trim()) else {
            return;
        };
        if !message.is_response() {
            return;
        }
        let Some(id) = &message.id else {
            return;
        };

        let tool = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.remove(&id_key(id))
        };
        let Some(tool) = tool else {
            return;
        };

        if message.is_failure() {
            debug!(tool = %tool, "Backend reported tool failure");
            self.circuit.record_failure(&tool);
        } else {
            self.circuit.record_success(&tool);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
