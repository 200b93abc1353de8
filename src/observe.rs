//! Per-call observability events.
//!
//! The gateway emits one [`CallEvent`] per tool call to a [`CallSink`]. How the
//! event is exported is up to the sink; the default [`TracingSink`] hands it to
//! `tracing` on the `cloudgate::calls` target and lets the subscriber decide.

use std::fmt;
use std::time::Duration;

use crate::gate::MutationDecision;

/// Final status of a call as seen by observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ok,
    Error,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Ok => f.write_str("ok"),
            CallStatus::Error => f.write_str("error"),
        }
    }
}

/// Structured event for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    /// Canonical name when resolution succeeded, otherwise the name as supplied.
    pub tool_name: String,
    /// None when the call failed before reaching the gate.
    pub mutation_decision: Option<MutationDecision>,
    pub duration: Duration,
    pub status: CallStatus,
    pub error_kind: Option<&'static str>,
}

/// Receiver of per-call events.
pub trait CallSink: Send + Sync {
    fn record(&self, event: &CallEvent);
}

/// Default sink: one `tracing` event per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl CallSink for TracingSink {
    fn record(&self, event: &CallEvent) {
        let decision = event
            .mutation_decision
            .map(|d| d.to_string())
            .unwrap_or_else(|| "NONE".to_string());
        tracing::info!(
            target: "cloudgate::calls",
            tool = %event.tool_name,
            mutation_decision = %decision,
            duration_ms = %event.duration.as_millis(),
            status = %event.status,
            error_kind = event.error_kind.unwrap_or(""),
            "tool call"
        );
    }
}
