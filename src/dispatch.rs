//! Dispatcher — runs a gated call against its backend capability.
//!
//! Picks the capability path from the gate decision (apply for EXECUTE,
//! preview for SIMULATE), enforces the call timeout, and maps backend failures
//! into `GatewayError`. Nothing is retried here: mutating cloud operations are
//! not guaranteed idempotent, so retrying is the caller's call.

use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::capability::Capability;
use crate::error::GatewayError;
use crate::gate::MutationDecision;
use crate::registry::ToolDescriptor;

/// Outcome of one tool call: a payload or a typed failure, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    /// Canonical tool name, or the supplied name if resolution failed.
    pub tool: String,
    /// Gate decision; None when the call failed before gating.
    pub decision: Option<MutationDecision>,
    pub outcome: std::result::Result<Value, GatewayError>,
}

impl DispatchResult {
    pub fn success(tool: &str, decision: MutationDecision, data: Value) -> Self {
        DispatchResult {
            tool: tool.to_string(),
            decision: Some(decision),
            outcome: Ok(data),
        }
    }

    pub fn failure(tool: &str, decision: Option<MutationDecision>, error: GatewayError) -> Self {
        DispatchResult {
            tool: tool.to_string(),
            decision,
            outcome: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// True when the payload came from a preview path.
    pub fn is_simulated(&self) -> bool {
        self.decision == Some(MutationDecision::Simulate)
    }

    pub fn data(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&GatewayError> {
        self.outcome.as_ref().err()
    }
}

/// Invokes backend capabilities under a bounded timeout.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(default_timeout: Duration) -> Self {
        Dispatcher { default_timeout }
    }

    /// Effective timeout for a tool: its own override or the policy default.
    pub fn timeout_for(&self, descriptor: &ToolDescriptor) -> Duration {
        descriptor.timeout().unwrap_or(self.default_timeout)
    }

    /// Run one bound call.
    ///
    /// On timeout the gateway stops waiting and reports `Timeout`; the backend
    /// call itself may still complete on the provider side.
    pub async fn dispatch(
        &self,
        descriptor: &ToolDescriptor,
        params: &Map<String, Value>,
        decision: MutationDecision,
    ) -> DispatchResult {
        let tool = descriptor.name();
        let op = match (decision, descriptor.capability()) {
            (MutationDecision::RejectedNeedsConfirmation, _) => {
                return DispatchResult::failure(
                    tool,
                    Some(decision),
                    GatewayError::ConfirmationRequired {
                        tool: tool.to_string(),
                    },
                );
            }
            (MutationDecision::Execute | MutationDecision::Simulate, Capability::Query(op)) => op,
            (MutationDecision::Execute, Capability::Mutation { apply, .. }) => apply,
            (MutationDecision::Simulate, Capability::Mutation { preview, .. }) => preview,
        };

        let limit = self.timeout_for(descriptor);
        let start = Instant::now();
        let result = tokio::time::timeout(limit, op.call(params)).await;
        let elapsed = start.elapsed().as_millis();

        match result {
            Ok(Ok(data)) => {
                tracing::debug!(
                    tool = %tool,
                    decision = %decision,
                    duration_ms = %elapsed,
                    "backend call succeeded"
                );
                DispatchResult::success(tool, decision, data)
            }
            Ok(Err(failure)) => {
                tracing::warn!(
                    tool = %tool,
                    decision = %decision,
                    code = failure.code.as_deref().unwrap_or(""),
                    error = %failure.message,
                    "backend call failed"
                );
                DispatchResult::failure(
                    tool,
                    Some(decision),
                    GatewayError::Backend {
                        tool: tool.to_string(),
                        code: failure.code,
                        message: failure.message,
                    },
                )
            }
            Err(_elapsed) => {
                tracing::warn!(
                    tool = %tool,
                    decision = %decision,
                    timeout_ms = %limit.as_millis(),
                    "backend call timed out"
                );
                DispatchResult::failure(
                    tool,
                    Some(decision),
                    GatewayError::Timeout {
                        tool: tool.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    },
                )
            }
        }
    }
}
