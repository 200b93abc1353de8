//! Mutation-safety gate.
//!
//! Decides, once per call and without retained state, whether a tool's
//! backend runs for real, runs its preview path, or is not called at all.
//!
//! Evaluation order (strict priority):
//! 1. Non-mutating tool: always executes, `dry_run`/`confirm` are ignored
//! 2. `dry_run = true`: simulate via the preview path
//! 3. `confirm = true`: execute
//! 4. Policy requires confirmation: reject
//! 5. Permissive policy: execute

use std::fmt;

use serde::Serialize;

use crate::error::GatewayError;

/// Outcome of the gate for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationDecision {
    Execute,
    Simulate,
    RejectedNeedsConfirmation,
}

impl fmt::Display for MutationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MutationDecision::Execute => "EXECUTE",
            MutationDecision::Simulate => "SIMULATE",
            MutationDecision::RejectedNeedsConfirmation => "REJECTED_NEEDS_CONFIRMATION",
        };
        f.write_str(label)
    }
}

/// States the gate passes through while evaluating a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Read-only tool; passes straight to dispatch.
    NotMutating,
    /// Mutating tool whose flags have not been evaluated yet.
    AwaitingDecision,
    Execute,
    Simulate,
    Rejected,
}

impl GateState {
    /// Advance one transition. Terminal states return themselves.
    fn step(self, dry_run: bool, confirm: bool, require_confirm: bool) -> Self {
        match self {
            GateState::AwaitingDecision if dry_run => GateState::Simulate,
            GateState::AwaitingDecision if confirm => GateState::Execute,
            GateState::AwaitingDecision if require_confirm => GateState::Rejected,
            GateState::AwaitingDecision => GateState::Execute,
            terminal => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GateState::AwaitingDecision)
    }

    /// Decision corresponding to a terminal state.
    pub fn decision(&self) -> Option<MutationDecision> {
        match self {
            GateState::NotMutating | GateState::Execute => Some(MutationDecision::Execute),
            GateState::Simulate => Some(MutationDecision::Simulate),
            GateState::Rejected => Some(MutationDecision::RejectedNeedsConfirmation),
            GateState::AwaitingDecision => None,
        }
    }
}

/// The dry-run/confirm gate, parameterized by the process-wide policy.
#[derive(Debug, Clone, Copy)]
pub struct MutationGate {
    require_confirm: bool,
}

impl MutationGate {
    pub fn new(require_confirm: bool) -> Self {
        MutationGate { require_confirm }
    }

    pub fn require_confirm(&self) -> bool {
        self.require_confirm
    }

    /// Run the state machine to its terminal state. Absent flags count as false.
    pub fn evaluate(
        &self,
        is_mutating: bool,
        dry_run: Option<bool>,
        confirm: Option<bool>,
    ) -> GateState {
        let dry_run = dry_run.unwrap_or(false);
        let confirm = confirm.unwrap_or(false);
        let mut state = if is_mutating {
            GateState::AwaitingDecision
        } else {
            GateState::NotMutating
        };
        while !state.is_terminal() {
            state = state.step(dry_run, confirm, self.require_confirm);
        }
        state
    }

    /// Decision for a call, without raising an error for rejection.
    pub fn decide(
        &self,
        is_mutating: bool,
        dry_run: Option<bool>,
        confirm: Option<bool>,
    ) -> MutationDecision {
        self.evaluate(is_mutating, dry_run, confirm)
            .decision()
            .unwrap_or(MutationDecision::RejectedNeedsConfirmation)
    }

    /// Admit a call to dispatch, or fail with `ConfirmationRequired`.
    pub fn admit(
        &self,
        tool: &str,
        is_mutating: bool,
        dry_run: Option<bool>,
        confirm: Option<bool>,
    ) -> crate::Result<MutationDecision> {
        match self.decide(is_mutating, dry_run, confirm) {
            MutationDecision::RejectedNeedsConfirmation => {
                tracing::info!(tool = %tool, "mutating call rejected: confirmation required");
                Err(GatewayError::ConfirmationRequired {
                    tool: tool.to_string(),
                })
            }
            decision => Ok(decision),
        }
    }
}
