//! Input mapping and recommendation templates for skill steps.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::{InputSource, SkillStep};
use crate::error::GatewayError;

/// Placeholders accepted in `on_failure` templates.
pub const TEMPLATE_PLACEHOLDERS: &[&str] = &["step", "tool", "kind", "message"];

const DEFAULT_RECOMMENDATION: &str =
    "Step '{step}' ({tool}) failed with {kind}: {message}. Fix the cause and call {tool} directly to retry it.";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("valid regex"))
}

/// Check that a template only uses known placeholders.
/// Returns the first unknown placeholder name on failure.
pub fn check_template(template: &str) -> std::result::Result<(), String> {
    match placeholder_re()
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .find(|m| !TEMPLATE_PLACEHOLDERS.contains(&m.as_str()))
    {
        Some(unknown) => Err(unknown.as_str().to_string()),
        None => Ok(()),
    }
}

/// Recommendation for a failed step: its own template, or the default one.
pub fn recommendation(step: &SkillStep, tool: &str, error: &GatewayError) -> String {
    let template = step.on_failure.as_deref().unwrap_or(DEFAULT_RECOMMENDATION);
    let message = error.to_string();
    let vars: HashMap<&str, &str> = HashMap::from([
        ("step", step.id()),
        ("tool", tool),
        ("kind", error.kind()),
        ("message", message.as_str()),
    ]);
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            vars.get(name)
                .map(|v| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Build a step's raw parameters from its input mapping.
///
/// `outputs` holds the data of earlier successful steps keyed by step id.
/// A source that cannot be resolved (missing pointer target, failed or
/// skipped step) leaves the parameter absent so the binder can apply the
/// default or report it missing.
pub fn resolve_inputs(
    step: &SkillStep,
    context: &Value,
    outputs: &HashMap<String, Value>,
) -> Map<String, Value> {
    let mut params = Map::new();
    for (name, source) in &step.inputs {
        let value = match source {
            InputSource::Literal { value } => Some(value),
            InputSource::Context { path } => context.pointer(path),
            InputSource::Step { step, path } => outputs.get(step).and_then(|v| v.pointer(path)),
        };
        match value {
            Some(v) => {
                params.insert(name.clone(), v.clone());
            }
            None => {
                tracing::debug!(step = %step.id(), param = %name, "input source unresolved");
            }
        }
    }
    params
}
