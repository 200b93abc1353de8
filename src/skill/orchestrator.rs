//! Skill orchestrator — runs a skill's steps in order.
//!
//! Each step goes through the same resolve → bind → gate → dispatch path as a
//! direct call (via [`StepInvoker`]). After every step the orchestrator
//! publishes a [`ProgressEvent`] on a `watch` channel. A REQUIRED failure ends
//! the run as FAILED; an OPTIONAL failure is recorded and the run continues,
//! ending at best PARTIAL. Collected data is never discarded.
//!
//! Cancellation is checked between steps only: a backend call that was
//! already dispatched runs to completion (or to its timeout).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{mapping, SkillDefinition, StepPolicy};
use crate::dispatch::DispatchResult;
use crate::error::GatewayError;

/// Aggregate status of a skill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillStatus {
    /// Every executed step succeeded.
    Success,
    /// Only optional steps failed.
    Partial,
    /// A required step failed, or the run was cancelled while required steps
    /// were still pending (with `CancelledError` as the terminal error, even
    /// though no step failed).
    Failed,
}

/// Progress snapshot published after each completed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub skill: String,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub phase: String,
}

impl ProgressEvent {
    pub(crate) fn start(skill: &SkillDefinition) -> Self {
        ProgressEvent {
            skill: skill.name.clone(),
            completed_steps: 0,
            total_steps: skill.steps.len(),
            phase: "starting".to_string(),
        }
    }

    /// Completed fraction in [0, 1].
    pub fn fraction(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }
}

/// One executed step and its result.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub id: String,
    pub tool: String,
    pub policy: StepPolicy,
    pub result: DispatchResult,
}

/// Result of running a skill.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillRun {
    pub skill: String,
    /// Executed steps, in execution order.
    pub steps: Vec<StepRecord>,
    pub total_steps: usize,
    pub status: SkillStatus,
    /// One entry per failed step, from its `on_failure` template.
    pub recommendations: Vec<String>,
    /// The REQUIRED step error (or cancellation) that ended the run.
    pub terminal_error: Option<GatewayError>,
}

impl SkillRun {
    /// Fraction of declared steps that were executed.
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.steps.len() as f64 / self.total_steps as f64
    }

    /// Data of successful steps keyed by step id.
    pub fn composite_data(&self) -> Value {
        let data: Map<String, Value> = self
            .steps
            .iter()
            .filter_map(|s| s.result.data().map(|d| (s.id.clone(), d.clone())))
            .collect();
        Value::Object(data)
    }

    /// Failed steps as `(id, error)`, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &GatewayError)> {
        self.steps
            .iter()
            .filter_map(|s| s.result.error().map(|e| (s.id.as_str(), e)))
    }

    /// The run's error: the terminal error when FAILED, `PartialSkillFailure`
    /// when PARTIAL, nothing on SUCCESS.
    pub fn error(&self) -> Option<GatewayError> {
        match self.status {
            SkillStatus::Success => None,
            SkillStatus::Failed => self.terminal_error.clone(),
            SkillStatus::Partial => Some(GatewayError::PartialSkillFailure {
                skill: self.skill.clone(),
                failed_steps: self.failures().map(|(id, _)| id.to_string()).collect(),
            }),
        }
    }

    /// True if any executed step took the preview path.
    pub fn is_simulated(&self) -> bool {
        self.steps.iter().any(|s| s.result.is_simulated())
    }
}

/// The per-step call path a skill runs through.
#[async_trait]
pub trait StepInvoker: Send + Sync {
    /// Resolve, bind, gate and dispatch one tool call.
    async fn invoke_step(
        &self,
        tool: &str,
        params: Map<String, Value>,
        dry_run: Option<bool>,
        confirm: Option<bool>,
    ) -> DispatchResult;
}

/// Caller-supplied inputs for one skill run.
#[derive(Debug, Clone, Default)]
pub struct SkillRequest {
    /// Initial context that `from = "context"` inputs point into.
    pub context: Map<String, Value>,
    /// Applied to every mutating step.
    pub dry_run: Option<bool>,
    /// Applied to every mutating step.
    pub confirm: Option<bool>,
}

/// Run `skill` to completion, failure or cancellation.
pub async fn execute(
    invoker: &dyn StepInvoker,
    skill: &SkillDefinition,
    request: SkillRequest,
    progress: &watch::Sender<ProgressEvent>,
    cancel: &CancellationToken,
) -> SkillRun {
    let total = skill.steps.len();
    let context = Value::Object(request.context);
    let mut outputs: HashMap<String, Value> = HashMap::new();
    let mut run = SkillRun {
        skill: skill.name.clone(),
        steps: Vec::with_capacity(total),
        total_steps: total,
        status: SkillStatus::Success,
        recommendations: Vec::new(),
        terminal_error: None,
    };

    progress.send_replace(ProgressEvent::start(skill));
    tracing::info!(skill = %skill.name, steps = total, "skill started");

    for (index, step) in skill.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            let required_left = skill.steps[index..]
                .iter()
                .any(|s| s.policy == StepPolicy::Required);
            tracing::info!(
                skill = %skill.name,
                completed = index,
                required_left,
                "skill cancelled"
            );
            if required_left {
                run.status = SkillStatus::Failed;
                run.terminal_error = Some(GatewayError::Cancelled(skill.name.clone()));
            }
            break;
        }

        let params = mapping::resolve_inputs(step, &context, &outputs);
        let result = invoker
            .invoke_step(&step.tool, params, request.dry_run, request.confirm)
            .await;

        match &result.outcome {
            Ok(data) => {
                outputs.insert(step.id().to_string(), data.clone());
            }
            Err(error) => {
                tracing::warn!(
                    skill = %skill.name,
                    step = %step.id(),
                    policy = ?step.policy,
                    kind = error.kind(),
                    "skill step failed"
                );
                run.recommendations
                    .push(mapping::recommendation(step, &result.tool, error));
            }
        }

        let succeeded = result.is_success();
        let terminal = result.error().cloned();
        run.steps.push(StepRecord {
            id: step.id().to_string(),
            tool: result.tool.clone(),
            policy: step.policy,
            result,
        });

        progress.send_replace(ProgressEvent {
            skill: skill.name.clone(),
            completed_steps: index + 1,
            total_steps: total,
            phase: step.phase_label(),
        });

        if !succeeded {
            if step.policy == StepPolicy::Required {
                run.status = SkillStatus::Failed;
                run.terminal_error = terminal;
                break;
            }
            run.status = SkillStatus::Partial;
        }
    }

    tracing::info!(
        skill = %skill.name,
        status = ?run.status,
        executed = run.steps.len(),
        total,
        "skill finished"
    );
    run
}

/// A skill running on its own task.
pub struct SkillHandle {
    skill: String,
    progress: watch::Receiver<ProgressEvent>,
    cancel: CancellationToken,
    join: JoinHandle<SkillRun>,
}

impl SkillHandle {
    pub(crate) fn new(
        skill: &str,
        progress: watch::Receiver<ProgressEvent>,
        cancel: CancellationToken,
        join: JoinHandle<SkillRun>,
    ) -> Self {
        SkillHandle {
            skill: skill.to_string(),
            progress,
            cancel,
            join,
        }
    }

    /// A receiver for progress events; each subscriber sees the latest value.
    pub fn progress(&self) -> watch::Receiver<ProgressEvent> {
        self.progress.clone()
    }

    /// Stop scheduling further steps. The step in flight, if any, completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish.
    pub async fn join(self) -> crate::Result<SkillRun> {
        self.join.await.map_err(|e| {
            tracing::error!(skill = %self.skill, error = %e, "skill task ended abnormally");
            GatewayError::Cancelled(self.skill.clone())
        })
    }
}
