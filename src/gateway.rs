//! Gateway — the inbound call pipeline.
//!
//! `invoke` runs one call end to end:
//! 1. Skill lookup: a skill name runs the orchestrator instead of one tool
//! 2. Name resolution (canonical name or any alias)
//! 3. Policy defaults for `profile`/`region` when the tool declares them
//! 4. Parameter binding against the compiled schema
//! 5. Mutation gate
//! 6. Dispatch under the call timeout
//!
//! Steps 2-6 emit exactly one `CallEvent` per tool call, whether it succeeded
//! or failed at any stage.
//!
//! A `Gateway` is frozen once built. Cloning it is cheap and shares the
//! registry, skills and sink; reconfiguration builds a new one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::cli;
use crate::config::{GatewayConfig, PolicyConfig};
use crate::dispatch::{DispatchResult, Dispatcher};
use crate::error::GatewayError;
use crate::format::{Envelope, OutputFormat, Outcome};
use crate::gate::{MutationDecision, MutationGate};
use crate::observe::{CallEvent, CallSink, CallStatus, TracingSink};
use crate::registry::{RegistryBuilder, ToolDescriptor, ToolRegistry};
use crate::skill::orchestrator;
use crate::skill::{ProgressEvent, SkillDefinition, SkillHandle, SkillRequest, SkillRun, StepInvoker};

/// One inbound call. `tool_name` may be a canonical name, an alias or a
/// skill name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationRequest {
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub dry_run: Option<bool>,
    pub confirm: Option<bool>,
    pub format: Option<OutputFormat>,
}

impl InvocationRequest {
    pub fn new(tool_name: &str) -> Self {
        InvocationRequest {
            tool_name: tool_name.to_string(),
            ..Default::default()
        }
    }

    pub fn param(mut self, name: &str, value: Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    pub fn confirm(mut self, confirm: bool) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Build a request from a flat argument object, lifting the reserved
    /// `dry_run`, `confirm` and `format` keys out of the parameters.
    pub fn from_arguments(tool_name: &str, mut arguments: Map<String, Value>) -> crate::Result<Self> {
        let dry_run = take_flag(&mut arguments, "dry_run")?;
        let confirm = take_flag(&mut arguments, "confirm")?;
        let format = match arguments.remove("format") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.parse::<OutputFormat>()?),
            Some(other) => {
                return Err(GatewayError::InvalidParameter {
                    name: "format".to_string(),
                    expected: "string".to_string(),
                    got: crate::schema::type_name(&other).to_string(),
                });
            }
        };
        Ok(InvocationRequest {
            tool_name: tool_name.to_string(),
            parameters: arguments,
            dry_run,
            confirm,
            format,
        })
    }
}

fn take_flag(arguments: &mut Map<String, Value>, name: &str) -> crate::Result<Option<bool>> {
    match arguments.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(other) => Err(GatewayError::InvalidParameter {
            name: name.to_string(),
            expected: "boolean".to_string(),
            got: crate::schema::type_name(&other).to_string(),
        }),
    }
}

/// Reply to one inbound call, with the format it should be rendered in.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub outcome: Outcome,
    pub format: OutputFormat,
}

impl Response {
    pub fn envelope(&self) -> Envelope {
        self.outcome.envelope()
    }

    pub fn render(&self) -> String {
        self.outcome.render(self.format)
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }
}

/// The tool invocation gateway.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ToolRegistry>,
    skills: Arc<HashMap<String, Arc<SkillDefinition>>>,
    /// Skill names in registration order, for stable listings.
    skill_order: Arc<Vec<String>>,
    gate: MutationGate,
    dispatcher: Dispatcher,
    policy: PolicyConfig,
    sink: Arc<dyn CallSink>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Validate a config and build a gateway from it.
    pub fn from_config(config: &GatewayConfig) -> crate::Result<Self> {
        config.validate()?;
        let mut builder = Gateway::builder().policy(config.policy.clone());
        for (key, tool) in &config.tools {
            if !tool.enabled {
                tracing::debug!(key = %key, "skipping disabled tool");
                continue;
            }
            builder.register(cli::build_tool(key, tool)?)?;
        }
        for skill in config.skill_definitions() {
            builder.add_skill(skill);
        }
        builder.build()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Skill by exact name.
    pub fn skill(&self, name: &str) -> Option<&Arc<SkillDefinition>> {
        self.skills.get(name)
    }

    /// Skills in registration order.
    pub fn skills(&self) -> impl Iterator<Item = &Arc<SkillDefinition>> {
        self.skill_order.iter().filter_map(|n| self.skills.get(n))
    }

    /// Run one inbound call: a skill if the name is a skill, else one tool.
    ///
    /// A skill call emits one event of its own, after the events of its steps.
    pub async fn invoke(&self, request: InvocationRequest) -> Response {
        let format = request.format.unwrap_or_default();
        let outcome = if self.skills.contains_key(&request.tool_name) {
            let start = Instant::now();
            let skill_request = SkillRequest {
                context: request.parameters,
                dry_run: request.dry_run,
                confirm: request.confirm,
            };
            let outcome = match self.run_skill(&request.tool_name, skill_request).await {
                Ok(run) => Outcome::Skill(run),
                Err(e) => Outcome::Tool(DispatchResult::failure(&request.tool_name, None, e)),
            };
            let error_kind = match &outcome {
                Outcome::Skill(run) => run.error().map(|e| e.kind()),
                Outcome::Tool(result) => result.error().map(GatewayError::kind),
            };
            self.record(&request.tool_name, None, start, outcome.is_error(), error_kind);
            outcome
        } else {
            Outcome::Tool(
                self.call_tool(
                    &request.tool_name,
                    request.parameters,
                    request.dry_run,
                    request.confirm,
                )
                .await,
            )
        };
        Response { outcome, format }
    }

    /// Reply to a call that was malformed before it could be routed (e.g. a
    /// reserved key of the wrong type), still emitting its event.
    pub fn reject(&self, tool_name: &str, error: GatewayError, format: OutputFormat) -> Response {
        let start = Instant::now();
        let result = DispatchResult::failure(tool_name, None, error);
        self.record(tool_name, None, start, true, result.error().map(GatewayError::kind));
        Response {
            outcome: Outcome::Tool(result),
            format,
        }
    }

    /// Resolve, bind, gate and dispatch one tool call, then emit its event.
    pub async fn call_tool(
        &self,
        name: &str,
        parameters: Map<String, Value>,
        dry_run: Option<bool>,
        confirm: Option<bool>,
    ) -> DispatchResult {
        let start = Instant::now();
        let result = self.run_pipeline(name, parameters, dry_run, confirm).await;
        let error_kind = result.error().map(GatewayError::kind);
        self.record(&result.tool, result.decision, start, error_kind.is_some(), error_kind);
        result
    }

    fn record(
        &self,
        tool_name: &str,
        mutation_decision: Option<MutationDecision>,
        start: Instant,
        failed: bool,
        error_kind: Option<&'static str>,
    ) {
        self.sink.record(&CallEvent {
            tool_name: tool_name.to_string(),
            mutation_decision,
            duration: start.elapsed(),
            status: if failed { CallStatus::Error } else { CallStatus::Ok },
            error_kind,
        });
    }

    async fn run_pipeline(
        &self,
        name: &str,
        parameters: Map<String, Value>,
        dry_run: Option<bool>,
        confirm: Option<bool>,
    ) -> DispatchResult {
        let descriptor = match self.registry.resolve(name) {
            Ok(d) => Arc::clone(d),
            Err(e) => {
                tracing::debug!(tool = %name, "unknown tool");
                return DispatchResult::failure(name, None, e);
            }
        };

        let parameters = self.apply_policy_defaults(&descriptor, parameters);
        let bound = match descriptor.schema().bind(&parameters) {
            Ok(bound) => bound,
            Err(e) => {
                tracing::debug!(tool = %descriptor.name(), error = %e, "parameter binding failed");
                return DispatchResult::failure(descriptor.name(), None, e);
            }
        };

        let decision =
            match self
                .gate
                .admit(descriptor.name(), descriptor.is_mutating(), dry_run, confirm)
            {
                Ok(decision) => decision,
                Err(e) => {
                    return DispatchResult::failure(
                        descriptor.name(),
                        Some(MutationDecision::RejectedNeedsConfirmation),
                        e,
                    );
                }
            };

        self.dispatcher.dispatch(&descriptor, &bound, decision).await
    }

    /// Fill `profile`/`region` from the policy when the tool declares them
    /// and the caller left them out.
    fn apply_policy_defaults(
        &self,
        descriptor: &ToolDescriptor,
        mut parameters: Map<String, Value>,
    ) -> Map<String, Value> {
        let defaults = [
            ("profile", self.policy.default_profile.as_ref()),
            ("region", self.policy.default_region.as_ref()),
        ];
        for (name, default) in defaults {
            let Some(default) = default else { continue };
            let absent = parameters.get(name).is_none_or(Value::is_null);
            if absent && descriptor.schema().contains(name) {
                parameters.insert(name.to_string(), Value::String(default.clone()));
            }
        }
        parameters
    }

    /// Run a skill to completion on the current task.
    pub async fn run_skill(&self, name: &str, request: SkillRequest) -> crate::Result<SkillRun> {
        let skill = self
            .skill(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;
        let (progress, _rx) = watch::channel(ProgressEvent::start(&skill));
        Ok(orchestrator::execute(self, &skill, request, &progress, &CancellationToken::new()).await)
    }

    /// Run a skill on its own task, with progress and cancellation handles.
    pub fn spawn_skill(&self, name: &str, request: SkillRequest) -> crate::Result<SkillHandle> {
        let skill = self
            .skill(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;
        let (progress, rx) = watch::channel(ProgressEvent::start(&skill));
        let cancel = CancellationToken::new();

        let gateway = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            orchestrator::execute(&gateway, &skill, request, &progress, &token).await
        });
        Ok(SkillHandle::new(name, rx, cancel, join))
    }
}

#[async_trait]
impl StepInvoker for Gateway {
    async fn invoke_step(
        &self,
        tool: &str,
        params: Map<String, Value>,
        dry_run: Option<bool>,
        confirm: Option<bool>,
    ) -> DispatchResult {
        self.call_tool(tool, params, dry_run, confirm).await
    }
}

/// Startup-time gateway assembly.
#[derive(Default)]
pub struct GatewayBuilder {
    registry: RegistryBuilder,
    skills: Vec<SkillDefinition>,
    policy: PolicyConfig,
    sink: Option<Arc<dyn CallSink>>,
}

impl GatewayBuilder {
    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn CallSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register a tool. See [`RegistryBuilder::register`].
    pub fn register(&mut self, descriptor: ToolDescriptor) -> crate::Result<()> {
        self.registry.register(descriptor)
    }

    /// Chaining form of [`GatewayBuilder::register`].
    pub fn tool(mut self, descriptor: ToolDescriptor) -> crate::Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Add a skill; it is validated in [`GatewayBuilder::build`].
    pub fn add_skill(&mut self, skill: SkillDefinition) {
        self.skills.push(skill);
    }

    /// Chaining form of [`GatewayBuilder::add_skill`].
    pub fn skill(mut self, skill: SkillDefinition) -> Self {
        self.add_skill(skill);
        self
    }

    /// Freeze the registry and validate every skill against it.
    pub fn build(self) -> crate::Result<Gateway> {
        if self.policy.call_timeout_secs == 0 {
            return Err(GatewayError::InvalidConfig(
                "policy".to_string(),
                "call_timeout_secs must be > 0".to_string(),
            ));
        }

        let registry = self.registry.build();
        let mut skills: HashMap<String, Arc<SkillDefinition>> = HashMap::new();
        let mut skill_order = Vec::with_capacity(self.skills.len());
        for skill in self.skills {
            skill.validate(&registry)?;
            if skills.contains_key(&skill.name) {
                return Err(GatewayError::DuplicateName(skill.name.clone()));
            }
            skill_order.push(skill.name.clone());
            skills.insert(skill.name.clone(), Arc::new(skill));
        }

        tracing::info!(
            tools = registry.len(),
            skills = skills.len(),
            require_confirm = self.policy.require_confirm,
            "gateway built"
        );

        Ok(Gateway {
            registry: Arc::new(registry),
            skills: Arc::new(skills),
            skill_order: Arc::new(skill_order),
            gate: MutationGate::new(self.policy.require_confirm),
            dispatcher: Dispatcher::new(self.policy.call_timeout()),
            policy: self.policy,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
        })
    }
}
