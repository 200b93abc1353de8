//! Result formatter — projects dispatch and skill results into replies.
//!
//! Two modes: `structured` (the JSON envelope) and `human-readable` (a text
//! report with tables for list-shaped data). Rendering is a pure projection:
//! it never changes status or data.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::DispatchResult;
use crate::error::GatewayError;
use crate::skill::{SkillRun, SkillStatus};

/// Presentation mode for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "structured")]
    Structured,
    #[serde(rename = "human-readable")]
    HumanReadable,
}

impl FromStr for OutputFormat {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured" => Ok(OutputFormat::Structured),
            "human-readable" => Ok(OutputFormat::HumanReadable),
            other => Err(GatewayError::InvalidParameter {
                name: "format".to_string(),
                expected: "one of [\"structured\", \"human-readable\"]".to_string(),
                got: format!("\"{}\"", other),
            }),
        }
    }
}

/// `status` field of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Machine-readable error body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&GatewayError> for ErrorBody {
    fn from(error: &GatewayError) -> Self {
        ErrorBody {
            kind: error.kind().to_string(),
            message: error.to_string(),
            code: error.code().map(String::from),
        }
    }
}

/// Canonical reply envelope: `{status, data}` or `{status, error}`.
///
/// Skill replies may carry both: the data collected so far alongside the
/// error that made the run PARTIAL or FAILED.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "error",
                "error": { "kind": "SerializationError", "message": e.to_string() }
            })
        })
    }
}

/// Anything the gateway can reply with.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Tool(DispatchResult),
    Skill(SkillRun),
}

impl Outcome {
    pub fn envelope(&self) -> Envelope {
        match self {
            Outcome::Tool(result) => tool_envelope(result),
            Outcome::Skill(run) => skill_envelope(run),
        }
    }

    pub fn is_error(&self) -> bool {
        self.envelope().is_error()
    }

    /// Render in the requested mode.
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Structured => {
                serde_json::to_string_pretty(&self.envelope().to_json()).unwrap_or_default()
            }
            OutputFormat::HumanReadable => match self {
                Outcome::Tool(result) => render_tool_text(result),
                Outcome::Skill(run) => render_skill_text(run),
            },
        }
    }
}

fn tool_envelope(result: &DispatchResult) -> Envelope {
    match &result.outcome {
        Ok(data) => Envelope {
            status: ResponseStatus::Ok,
            simulated: result.is_simulated(),
            data: Some(data.clone()),
            error: None,
        },
        Err(error) => Envelope {
            status: ResponseStatus::Error,
            simulated: false,
            data: None,
            error: Some(ErrorBody::from(error)),
        },
    }
}

fn skill_status_label(status: SkillStatus) -> &'static str {
    match status {
        SkillStatus::Success => "SUCCESS",
        SkillStatus::Partial => "PARTIAL",
        SkillStatus::Failed => "FAILED",
    }
}

fn skill_envelope(run: &SkillRun) -> Envelope {
    let failures: Vec<Value> = run
        .failures()
        .map(|(step, error)| {
            let mut body = serde_json::to_value(ErrorBody::from(error)).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut body {
                map.insert("step".to_string(), Value::String(step.to_string()));
            }
            body
        })
        .collect();

    let mut data = Map::new();
    data.insert("skill".to_string(), Value::String(run.skill.clone()));
    data.insert(
        "skill_status".to_string(),
        Value::String(skill_status_label(run.status).to_string()),
    );
    data.insert("progress".to_string(), serde_json::json!(run.progress()));
    data.insert("steps".to_string(), run.composite_data());
    if !failures.is_empty() {
        data.insert("failures".to_string(), Value::Array(failures));
    }
    if !run.recommendations.is_empty() {
        data.insert(
            "recommendations".to_string(),
            serde_json::json!(run.recommendations),
        );
    }

    Envelope {
        status: match run.status {
            SkillStatus::Failed => ResponseStatus::Error,
            SkillStatus::Success | SkillStatus::Partial => ResponseStatus::Ok,
        },
        simulated: run.is_simulated(),
        data: Some(Value::Object(data)),
        error: run.error().as_ref().map(ErrorBody::from),
    }
}

fn render_tool_text(result: &DispatchResult) -> String {
    let mut out = String::new();
    match &result.outcome {
        Ok(data) => {
            let marker = if result.is_simulated() { " (simulated, nothing was changed)" } else { "" };
            let _ = writeln!(out, "{}: ok{}", result.tool, marker);
            render_value(&mut out, data);
        }
        Err(error) => {
            let _ = writeln!(out, "{}: error", result.tool);
            render_error(&mut out, error, "  ");
        }
    }
    out
}

fn render_error(out: &mut String, error: &GatewayError, indent: &str) {
    let _ = writeln!(out, "{}kind: {}", indent, error.kind());
    let _ = writeln!(out, "{}message: {}", indent, error);
    if let Some(code) = error.code() {
        let _ = writeln!(out, "{}code: {}", indent, code);
    }
    if error.is_precondition() {
        let _ = writeln!(out, "{}hint: not sent to any backend; fix the request before retrying", indent);
    }
}

fn render_skill_text(run: &SkillRun) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Skill {}: {} ({}/{} steps, {:.0}%){}",
        run.skill,
        skill_status_label(run.status),
        run.steps.len(),
        run.total_steps,
        run.progress() * 100.0,
        if run.is_simulated() { " (simulated)" } else { "" }
    );

    let width = run.steps.iter().map(|s| s.id.len()).max().unwrap_or(0);
    for step in &run.steps {
        match step.result.error() {
            None => {
                let _ = writeln!(out, "  [ok]     {}", step.id);
            }
            Some(error) => {
                let _ = writeln!(
                    out,
                    "  [failed] {:<width$}  {}: {}",
                    step.id,
                    error.kind(),
                    error,
                    width = width
                );
            }
        }
    }
    if let Some(GatewayError::Cancelled(_)) = &run.terminal_error {
        let _ = writeln!(out, "  cancelled before all required steps ran");
    }

    if !run.recommendations.is_empty() {
        let _ = writeln!(out, "\nRecommendations:");
        for rec in &run.recommendations {
            let _ = writeln!(out, "  - {}", rec);
        }
    }

    for step in &run.steps {
        if let Some(data) = step.result.data() {
            let _ = writeln!(out, "\n== {} ==", step.id);
            render_value(&mut out, data);
        }
    }
    out
}

/// Text for a scalar cell: strings without quotes, null as empty.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_table(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(Value::is_object)
}

fn render_value(out: &mut String, value: &Value) {
    match value {
        Value::Array(items) if is_table(items) => render_table(out, items),
        Value::Array(items) if items.is_empty() => {
            let _ = writeln!(out, "(no results)");
        }
        Value::Array(items) => {
            for item in items {
                let _ = writeln!(out, "- {}", cell(item));
            }
        }
        Value::Object(map) => {
            let width = map.keys().map(String::len).max().unwrap_or(0);
            for (key, field) in map {
                match field {
                    Value::Array(items) if is_table(items) => {
                        let _ = writeln!(out, "{}:", key);
                        render_table(out, items);
                    }
                    _ => {
                        let _ = writeln!(out, "{:<width$}  {}", key, cell(field), width = width);
                    }
                }
            }
        }
        scalar => {
            let _ = writeln!(out, "{}", cell(scalar));
        }
    }
}

/// Column-aligned table; columns in order of first appearance.
fn render_table(out: &mut String, rows: &[Value]) {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key);
                }
            }
        }
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(*c).map(cell).unwrap_or_default())
                .collect()
        })
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<w$}", v, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", line(columns.clone()));
    let _ = writeln!(out, "{}", line(rule.iter().map(String::as_str).collect()));
    for row in &cells {
        let _ = writeln!(out, "{}", line(row.iter().map(String::as_str).collect()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::MutationDecision;
    use crate::skill::{StepPolicy, StepRecord};
    use serde_json::json;

    fn ok(tool: &str, decision: MutationDecision, data: Value) -> DispatchResult {
        DispatchResult::success(tool, decision, data)
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("structured".parse::<OutputFormat>().unwrap(), OutputFormat::Structured);
        assert_eq!(
            "human-readable".parse::<OutputFormat>().unwrap(),
            OutputFormat::HumanReadable
        );
        assert!(matches!(
            "yaml".parse::<OutputFormat>(),
            Err(GatewayError::InvalidParameter { name, .. }) if name == "format"
        ));
    }

    #[test]
    fn test_ok_envelope_shape() {
        let outcome = Outcome::Tool(ok(
            "compute_list_instances",
            MutationDecision::Execute,
            json!([{"id": "i-1"}]),
        ));
        assert_eq!(
            outcome.envelope().to_json(),
            json!({"status": "ok", "data": [{"id": "i-1"}]})
        );
    }

    #[test]
    fn test_simulated_envelope_flag() {
        let outcome = Outcome::Tool(ok(
            "compute_instance_action",
            MutationDecision::Simulate,
            json!({"would": "STOP"}),
        ));
        assert_eq!(
            outcome.envelope().to_json(),
            json!({"status": "ok", "simulated": true, "data": {"would": "STOP"}})
        );
    }

    #[test]
    fn test_error_envelope_shape() {
        let outcome = Outcome::Tool(DispatchResult::failure(
            "foo:bar",
            None,
            GatewayError::UnknownTool("foo:bar".to_string()),
        ));
        let json = outcome.envelope().to_json();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["kind"], "UnknownToolError");
        assert!(json.get("data").is_none());
        assert!(json["error"].get("code").is_none());
        assert!(outcome.is_error());
    }

    #[test]
    fn test_backend_code_in_envelope() {
        let outcome = Outcome::Tool(DispatchResult::failure(
            "iam_list_users",
            Some(MutationDecision::Execute),
            GatewayError::Backend {
                tool: "iam_list_users".to_string(),
                code: Some("AccessDenied".to_string()),
                message: "denied".to_string(),
            },
        ));
        assert_eq!(outcome.envelope().to_json()["error"]["code"], "AccessDenied");
    }

    #[test]
    fn test_rendering_never_alters_data() {
        let data = json!({"instances": [{"id": "i-1", "state": "running"}], "count": 1});
        let outcome = Outcome::Tool(ok("compute_list_instances", MutationDecision::Execute, data.clone()));
        let structured: Value =
            serde_json::from_str(&outcome.render(OutputFormat::Structured)).unwrap();
        assert_eq!(structured["data"], data);
    }

    #[test]
    fn test_human_readable_table() {
        let outcome = Outcome::Tool(ok(
            "compute_list_instances",
            MutationDecision::Execute,
            json!([
                {"id": "i-1", "state": "running"},
                {"id": "i-22", "state": "stopped", "zone": "b"}
            ]),
        ));
        let text = outcome.render(OutputFormat::HumanReadable);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "compute_list_instances: ok");
        assert_eq!(lines[1], "id    state    zone");
        assert_eq!(lines[2], "----  -------  ----");
        assert_eq!(lines[3], "i-1   running");
        assert_eq!(lines[4], "i-22  stopped  b");
    }

    #[test]
    fn test_human_readable_simulated_marker() {
        let outcome = Outcome::Tool(ok(
            "compute_instance_action",
            MutationDecision::Simulate,
            json!({"action": "STOP"}),
        ));
        let text = outcome.render(OutputFormat::HumanReadable);
        assert!(text.starts_with("compute_instance_action: ok (simulated"));
        assert!(text.contains("action  STOP"));
    }

    #[test]
    fn test_human_readable_error_hint_only_for_precondition() {
        let rejected = Outcome::Tool(DispatchResult::failure(
            "compute_instance_action",
            None,
            GatewayError::ConfirmationRequired {
                tool: "compute_instance_action".to_string(),
            },
        ));
        let text = rejected.render(OutputFormat::HumanReadable);
        assert!(text.starts_with("compute_instance_action: error"));
        assert!(text.contains("  kind: ConfirmationRequiredError"));
        assert!(text.contains("  hint: not sent to any backend"));

        let backend = Outcome::Tool(DispatchResult::failure(
            "iam_list_users",
            Some(MutationDecision::Execute),
            GatewayError::Backend {
                tool: "iam_list_users".to_string(),
                code: Some("AccessDenied".to_string()),
                message: "denied".to_string(),
            },
        ));
        let text = backend.render(OutputFormat::HumanReadable);
        assert!(text.contains("  code: AccessDenied"));
        assert!(!text.contains("hint:"));
    }

    fn partial_run() -> SkillRun {
        SkillRun {
            skill: "audit".to_string(),
            steps: vec![
                StepRecord {
                    id: "a".to_string(),
                    tool: "a".to_string(),
                    policy: StepPolicy::Required,
                    result: ok("a", MutationDecision::Execute, json!({"n": 1})),
                },
                StepRecord {
                    id: "b".to_string(),
                    tool: "b".to_string(),
                    policy: StepPolicy::Optional,
                    result: DispatchResult::failure(
                        "b",
                        Some(MutationDecision::Execute),
                        GatewayError::Timeout {
                            tool: "b".to_string(),
                            timeout_ms: 10,
                        },
                    ),
                },
            ],
            total_steps: 2,
            status: SkillStatus::Partial,
            recommendations: vec!["retry b".to_string()],
            terminal_error: None,
        }
    }

    #[test]
    fn test_partial_skill_envelope() {
        let env = Outcome::Skill(partial_run()).envelope().to_json();
        assert_eq!(env["status"], "ok");
        assert_eq!(env["data"]["skill_status"], "PARTIAL");
        assert_eq!(env["data"]["steps"], json!({"a": {"n": 1}}));
        assert_eq!(env["data"]["failures"][0]["step"], "b");
        assert_eq!(env["data"]["failures"][0]["kind"], "TimeoutError");
        assert_eq!(env["data"]["recommendations"], json!(["retry b"]));
        assert_eq!(env["error"]["kind"], "PartialSkillFailure");
    }

    #[test]
    fn test_failed_skill_is_error_with_data() {
        let mut run = partial_run();
        run.status = SkillStatus::Failed;
        run.terminal_error = run.steps[1].result.error().cloned();
        let env = Outcome::Skill(run).envelope();
        assert!(env.is_error());
        assert_eq!(env.error.as_ref().unwrap().kind, "TimeoutError");
        assert_eq!(env.data.as_ref().unwrap()["steps"], json!({"a": {"n": 1}}));
    }

    #[test]
    fn test_skill_status_block() {
        let text = Outcome::Skill(partial_run()).render(OutputFormat::HumanReadable);
        assert!(text.starts_with("Skill audit: PARTIAL (2/2 steps, 100%)"));
        assert!(text.contains("  [ok]     a"));
        assert!(text.contains("  [failed] b  TimeoutError"));
        assert!(text.contains("Recommendations:\n  - retry b"));
        assert!(text.contains("== a ==\nn  1"));
    }
}
