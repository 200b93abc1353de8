//! Skills — data-described sequences of tool calls.
//!
//! A skill is a list of steps, each naming a tool, a failure policy and an
//! input mapping that pulls parameters from literals, the caller's context or
//! earlier steps' results. Skills are plain data (usually `[skills.*]` tables
//! in `cloudgate.toml`) interpreted by the generic [`orchestrator`].

pub mod mapping;
pub mod orchestrator;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::registry::ToolRegistry;

pub use orchestrator::{
    ProgressEvent, SkillHandle, SkillRequest, SkillRun, SkillStatus, StepInvoker, StepRecord,
};

/// What a step failure does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPolicy {
    /// Failure aborts the skill.
    #[default]
    Required,
    /// Failure is recorded and the skill continues.
    Optional,
}

/// Where a step parameter comes from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "from", rename_all = "lowercase")]
pub enum InputSource {
    /// A fixed value.
    Literal { value: Value },
    /// A JSON pointer into the skill's initial parameters.
    Context {
        #[serde(default)]
        path: String,
    },
    /// A JSON pointer into an earlier step's result data.
    Step {
        step: String,
        #[serde(default)]
        path: String,
    },
}

impl InputSource {
    pub fn literal(value: Value) -> Self {
        InputSource::Literal { value }
    }

    pub fn context(path: &str) -> Self {
        InputSource::Context {
            path: path.to_string(),
        }
    }

    pub fn step(step: &str, path: &str) -> Self {
        InputSource::Step {
            step: step.to_string(),
            path: path.to_string(),
        }
    }

    fn path(&self) -> Option<&str> {
        match self {
            InputSource::Literal { .. } => None,
            InputSource::Context { path } | InputSource::Step { path, .. } => Some(path),
        }
    }
}

/// One step of a skill.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillStep {
    /// Key for this step's data in the composite result. Defaults to `tool`.
    #[serde(default)]
    pub id: Option<String>,
    /// Tool name in any accepted surface form.
    pub tool: String,
    #[serde(default)]
    pub policy: StepPolicy,
    /// Progress label reported when this step completes.
    #[serde(default)]
    pub phase: Option<String>,
    /// Recommendation template used when this step fails.
    #[serde(default)]
    pub on_failure: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSource>,
}

impl SkillStep {
    /// A REQUIRED step calling `tool`.
    pub fn required(tool: &str) -> Self {
        SkillStep {
            id: None,
            tool: tool.to_string(),
            policy: StepPolicy::Required,
            phase: None,
            on_failure: None,
            inputs: BTreeMap::new(),
        }
    }

    /// An OPTIONAL step calling `tool`.
    pub fn optional(tool: &str) -> Self {
        SkillStep {
            policy: StepPolicy::Optional,
            ..SkillStep::required(tool)
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    pub fn on_failure(mut self, template: &str) -> Self {
        self.on_failure = Some(template.to_string());
        self
    }

    pub fn input(mut self, param: &str, source: InputSource) -> Self {
        self.inputs.insert(param.to_string(), source);
        self
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.tool)
    }

    pub fn phase_label(&self) -> String {
        self.phase
            .clone()
            .unwrap_or_else(|| format!("running {}", self.tool))
    }
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillDefinition {
    /// Filled from the `[skills.<name>]` key when loaded from config.
    #[serde(skip)]
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<SkillStep>,
}

impl SkillDefinition {
    pub fn new(name: &str, title: &str) -> Self {
        SkillDefinition {
            name: name.to_string(),
            title: title.to_string(),
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn step(mut self, step: SkillStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Whether any step resolves to a mutating tool.
    pub fn is_mutating(&self, registry: &ToolRegistry) -> bool {
        self.steps
            .iter()
            .filter_map(|s| registry.resolve(&s.tool).ok())
            .any(|t| t.is_mutating())
    }

    /// Check the skill against the registry before first use.
    ///
    /// Rules:
    /// 1. The skill has a name, at least one step, and its name is not a tool name or alias
    /// 2. Every step's tool resolves
    /// 3. Step ids are unique within the skill
    /// 4. Mapped parameters exist in the tool's schema
    /// 5. `step` sources refer to an earlier step; pointers are empty or start with `/`
    /// 6. `on_failure` templates use only known placeholders
    pub fn validate(&self, registry: &ToolRegistry) -> crate::Result<()> {
        let invalid = |reason: String| GatewayError::InvalidConfig(self.name.clone(), reason);

        if self.name.is_empty() {
            return Err(invalid("skill name must be non-empty".to_string()));
        }
        if registry.contains(&self.name) {
            return Err(GatewayError::DuplicateName(self.name.clone()));
        }
        if self.steps.is_empty() {
            return Err(invalid("skill has no steps".to_string()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            let tool = registry.resolve(&step.tool).map_err(|_| {
                invalid(format!(
                    "step '{}' references unknown tool '{}'",
                    step.id(),
                    step.tool
                ))
            })?;

            for (param, source) in &step.inputs {
                if !tool.schema().contains(param) {
                    return Err(invalid(format!(
                        "step '{}' maps '{}', which tool '{}' does not declare",
                        step.id(),
                        param,
                        tool.name()
                    )));
                }
                if let InputSource::Step { step: from, .. } = source {
                    if !seen.contains(from.as_str()) {
                        return Err(invalid(format!(
                            "step '{}' reads from '{}', which is not an earlier step",
                            step.id(),
                            from
                        )));
                    }
                }
                if let Some(path) = source.path() {
                    if !path.is_empty() && !path.starts_with('/') {
                        return Err(invalid(format!(
                            "step '{}' input '{}' has invalid pointer '{}'",
                            step.id(),
                            param,
                            path
                        )));
                    }
                }
            }

            if let Some(template) = &step.on_failure {
                mapping::check_template(template).map_err(|placeholder| {
                    invalid(format!(
                        "step '{}' on_failure uses unknown placeholder '{{{}}}'",
                        step.id(),
                        placeholder
                    ))
                })?;
            }

            if !seen.insert(step.id()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id())));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::registry::ToolDescriptor;
    use crate::schema::{ParamSchema, ParamSpec, ParamType};
    use crate::test_support::CountingOp;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let schema = ParamSchema::compile(
            "compute_list_instances",
            vec![("region".to_string(), ParamSpec::new(ParamType::String))],
        )
        .unwrap();
        let mut builder = ToolRegistry::builder();
        builder
            .register(ToolDescriptor::new(
                "compute",
                "list-instances",
                "List instances",
                schema,
                Capability::query(CountingOp::ok(json!([]))),
            ))
            .unwrap();
        builder
            .register(ToolDescriptor::new(
                "cost",
                "get-budget",
                "Get budget",
                ParamSchema::empty(),
                Capability::query(CountingOp::ok(json!({}))),
            ))
            .unwrap();
        builder.build()
    }

    fn reason(err: GatewayError) -> String {
        match err {
            GatewayError::InvalidConfig(_, reason) => reason,
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_skill_passes() {
        let skill = SkillDefinition::new("inventory", "Inventory")
            .step(
                SkillStep::required("compute:list-instances")
                    .with_id("instances")
                    .input("region", InputSource::context("/region")),
            )
            .step(SkillStep::optional("cost_get_budget"));
        skill.validate(&registry()).unwrap();
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let skill = SkillDefinition::new("broken", "Broken").step(SkillStep::required("foo:bar"));
        let err = skill.validate(&registry()).unwrap_err();
        assert!(reason(err).contains("unknown tool 'foo:bar'"));
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let skill = SkillDefinition::new("twice", "Twice")
            .step(SkillStep::required("cost_get_budget"))
            .step(SkillStep::optional("cost:get-budget").with_id("cost_get_budget"));
        let err = skill.validate(&registry()).unwrap_err();
        assert!(reason(err).contains("duplicate step id"));
    }

    #[test]
    fn test_forward_step_reference_rejected() {
        let skill = SkillDefinition::new("forward", "Forward")
            .step(
                SkillStep::required("compute_list_instances")
                    .input("region", InputSource::step("budget", "/region")),
            )
            .step(SkillStep::required("cost_get_budget").with_id("budget"));
        let err = skill.validate(&registry()).unwrap_err();
        assert!(reason(err).contains("not an earlier step"));
    }

    #[test]
    fn test_undeclared_mapped_param_rejected() {
        let skill = SkillDefinition::new("extra", "Extra").step(
            SkillStep::required("cost_get_budget").input("month", InputSource::literal(json!("01"))),
        );
        let err = skill.validate(&registry()).unwrap_err();
        assert!(reason(err).contains("does not declare"));
    }

    #[test]
    fn test_bad_pointer_and_template_rejected() {
        let skill = SkillDefinition::new("pointer", "Pointer").step(
            SkillStep::required("compute_list_instances")
                .input("region", InputSource::context("region")),
        );
        assert!(reason(skill.validate(&registry()).unwrap_err()).contains("invalid pointer"));

        let skill = SkillDefinition::new("template", "Template")
            .step(SkillStep::required("cost_get_budget").on_failure("check {account}"));
        assert!(reason(skill.validate(&registry()).unwrap_err()).contains("{account}"));
    }

    #[test]
    fn test_skill_name_collides_with_tool() {
        let skill = SkillDefinition::new("cost:get-budget", "Clash")
            .step(SkillStep::required("cost_get_budget"));
        assert!(matches!(
            skill.validate(&registry()),
            Err(GatewayError::DuplicateName(name)) if name == "cost:get-budget"
        ));
    }

    #[test]
    fn test_empty_skill_rejected() {
        let skill = SkillDefinition::new("empty", "Empty");
        assert!(reason(skill.validate(&registry()).unwrap_err()).contains("no steps"));
    }

    #[test]
    fn test_step_deserializes_from_toml() {
        let step: SkillStep = toml::from_str(
            r#"
            id = "budget"
            tool = "cost:get-budget"
            policy = "optional"
            inputs.account = { from = "step", step = "identity", path = "/account" }
            inputs.month = { from = "literal", value = "2024-01" }
            "#,
        )
        .unwrap();
        assert_eq!(step.id(), "budget");
        assert_eq!(step.policy, StepPolicy::Optional);
        assert_eq!(
            step.inputs["account"],
            InputSource::step("identity", "/account")
        );
        assert_eq!(step.inputs["month"], InputSource::literal(json!("2024-01")));
        assert_eq!(step.phase_label(), "running cost:get-budget");
    }
}
