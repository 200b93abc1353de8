//! Cloudgate configuration — deserialization and validation.
//!
//! `cloudgate.toml` has three sections: `[policy]` (process-wide gating and
//! defaults), `[tools.*]` (CLI-backed tools) and `[skills.*]` (data-described
//! skills). Skills are checked against the built registry later, in
//! `Gateway::from_config`; everything else is checked here.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::backend::cli;
use crate::error::GatewayError;
use crate::schema::ParamSpec;
use crate::skill::SkillDefinition;

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// valid env-var reference.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve a map of env-var references to their actual values.
///
/// Unknown variables resolve to the empty string (same as shell `${UNSET-}`).
pub fn resolve_env_vars(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(k, v)| {
            let resolved = match parse_env_ref(v) {
                Some(var_name) => std::env::var(var_name).unwrap_or_default(),
                None => v.clone(), // caught by validate()
            };
            (k.clone(), resolved)
        })
        .collect()
}

/// Top-level Cloudgate configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Keyed by a free-form table name; sorted so registration order is stable.
    #[serde(default)]
    pub tools: BTreeMap<String, CliToolConfig>,
    #[serde(default)]
    pub skills: BTreeMap<String, SkillDefinition>,
}

/// Process-wide policy, read once at startup (or on reload).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Mutating calls without `confirm=true` are rejected when set.
    #[serde(default = "default_require_confirm")]
    pub require_confirm: bool,
    /// Supplied as `profile` to tools that declare it when the caller omits it.
    pub default_profile: Option<String>,
    /// Supplied as `region` to tools that declare it when the caller omits it.
    pub default_region: Option<String>,
    /// Default per-call timeout; tools may override it.
    #[serde(default = "default_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            require_confirm: default_require_confirm(),
            default_profile: None,
            default_region: None,
            call_timeout_secs: default_timeout_secs(),
        }
    }
}

impl PolicyConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

fn default_require_confirm() -> bool {
    true
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_tier() -> u8 {
    1
}

/// A cloud operation backed by a CLI command, configured under `[tools.*]`.
///
/// The command is run via `tokio::process::Command` (never a shell) with
/// structured argument passing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliToolConfig {
    /// Service segment of the canonical name (e.g. "compute").
    pub service: String,
    /// Action segment of the canonical name (e.g. "instance-action").
    pub action: String,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default = "default_tier")]
    pub tier: u8,
    /// Extra surface names besides `service_action` and `service:action`.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// The executable to run (e.g., "aws", "gcloud").
    pub command: String,
    /// Argument tokens; may contain `{param}`, `{param|lower}` or `{param|upper}`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Flags always appended (e.g., ["--output", "json"]).
    #[serde(default)]
    pub inject_flags: Vec<String>,
    /// Env var references (`${VAR}`), resolved when the tool is built.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Overrides `policy.call_timeout_secs` for this tool.
    pub timeout_secs: Option<u64>,
    /// Explicit classification; a verb heuristic decides when absent.
    pub mutating: Option<bool>,
    /// Flags that turn the command into its own dry run (e.g. ["--dry-run"]).
    pub preview_flags: Option<Vec<String>>,
    /// Non-zero exit codes that still mean the dry run succeeded. The AWS CLI
    /// reports a passing `--dry-run` as exit 254 with `DryRunOperation` on
    /// stderr, so EC2 tools set `[254]`. Only the preview run honours these.
    #[serde(default)]
    pub preview_success_codes: Vec<i32>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
}

impl GatewayConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| GatewayError::InvalidConfig("cloudgate.toml".to_string(), e.to_string()))
    }

    /// Read and parse a config file.
    pub async fn load(path: &Path) -> crate::Result<Self> {
        let subject = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::InvalidConfig(subject.clone(), e.to_string()))?;
        toml::from_str(&content).map_err(|e| GatewayError::InvalidConfig(subject, e.to_string()))
    }

    /// Skill definitions with their names filled in from the table keys.
    pub fn skill_definitions(&self) -> Vec<SkillDefinition> {
        self.skills
            .iter()
            .map(|(name, skill)| SkillDefinition {
                name: name.clone(),
                ..skill.clone()
            })
            .collect()
    }

    /// Validate the config, failing fast before anything is built.
    pub fn validate(&self) -> crate::Result<()> {
        // 1. Policy
        if self.policy.call_timeout_secs == 0 {
            return Err(GatewayError::InvalidConfig(
                "policy".to_string(),
                "call_timeout_secs must be > 0".to_string(),
            ));
        }

        // 2. Tools
        let mut seen_pairs: HashSet<(&str, &str)> = HashSet::new();
        for (key, tool) in &self.tools {
            if !tool.enabled {
                continue;
            }

            // Service: non-empty alphanumeric with hyphens, so the canonical
            // `service_action` name splits unambiguously
            if tool.service.is_empty()
                || !tool.service.chars().all(|c| c.is_alphanumeric() || c == '-')
            {
                return Err(GatewayError::InvalidConfig(
                    key.clone(),
                    "service must be non-empty alphanumeric with hyphens".to_string(),
                ));
            }
            if tool.action.is_empty() || tool.action.contains(':') {
                return Err(GatewayError::InvalidConfig(
                    key.clone(),
                    "action must be non-empty and must not contain ':'".to_string(),
                ));
            }
            if !seen_pairs.insert((tool.service.as_str(), tool.action.as_str())) {
                return Err(GatewayError::DuplicateName(format!(
                    "{}:{}",
                    tool.service, tool.action
                )));
            }

            if tool.command.is_empty() {
                return Err(GatewayError::InvalidConfig(
                    key.clone(),
                    "CLI tool requires non-empty 'command' field".to_string(),
                ));
            }

            // Env var references: must be ${VAR}
            for (env_key, value) in &tool.env {
                if parse_env_ref(value).is_none() {
                    return Err(GatewayError::InvalidConfig(
                        key.clone(),
                        format!(
                            "env value for key '{}' must be a ${{VAR}} reference, got '{}'",
                            env_key, value
                        ),
                    ));
                }
            }

            if tool.timeout_secs == Some(0) {
                return Err(GatewayError::InvalidConfig(
                    key.clone(),
                    "timeout_secs must be > 0".to_string(),
                ));
            }

            if let Some(flags) = &tool.preview_flags {
                if flags.is_empty() {
                    return Err(GatewayError::InvalidConfig(
                        key.clone(),
                        "preview_flags must not be empty when set".to_string(),
                    ));
                }
                if tool.mutating == Some(false) {
                    return Err(GatewayError::InvalidConfig(
                        key.clone(),
                        "preview_flags only apply to mutating tools".to_string(),
                    ));
                }
            } else if !tool.preview_success_codes.is_empty() {
                return Err(GatewayError::InvalidConfig(
                    key.clone(),
                    "preview_success_codes require preview_flags".to_string(),
                ));
            }

            // Placeholders must name a parameter that is always bound
            for name in cli::placeholder_names(&tool.args) {
                match tool.params.get(&name) {
                    Some(spec) if spec.required || spec.default.is_some() => {}
                    Some(_) => {
                        return Err(GatewayError::InvalidConfig(
                            key.clone(),
                            format!(
                                "placeholder '{{{}}}' needs a required parameter or one with a default",
                                name
                            ),
                        ));
                    }
                    None => {
                        return Err(GatewayError::InvalidConfig(
                            key.clone(),
                            format!("placeholder '{{{}}}' names an undeclared parameter", name),
                        ));
                    }
                }
            }
        }

        // 3. Skills: structure only; registry checks happen at build time
        for (name, skill) in &self.skills {
            if skill.steps.is_empty() {
                return Err(GatewayError::InvalidConfig(
                    name.clone(),
                    "skill has no steps".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParamType;

    fn parse_toml(toml_str: &str) -> GatewayConfig {
        toml::from_str(toml_str).expect("valid TOML")
    }

    fn invalid_reason(config: &GatewayConfig) -> (String, String) {
        match config.validate() {
            Err(GatewayError::InvalidConfig(subject, reason)) => (subject, reason),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    const INSTANCE_ACTION: &str = r#"
        [tools.instance-action]
        service = "compute"
        action = "instance-action"
        title = "Start, stop or reboot an instance"
        command = "aws"
        args = ["ec2", "{action|lower}-instances", "--instance-ids", "{instance_id}"]
        mutating = true
        preview_flags = ["--dry-run"]

        [tools.instance-action.params.instance_id]
        type = "string"
        required = true
        pattern = "^i-[0-9a-f]+$"

        [tools.instance-action.params.action]
        type = "string"
        required = true
        enum = ["START", "STOP", "REBOOT"]
    "#;

    #[test]
    fn test_parse_env_ref() {
        assert_eq!(parse_env_ref("${FOO}"), Some("FOO"));
        assert_eq!(parse_env_ref("${AWS_PROFILE}"), Some("AWS_PROFILE"));
        assert_eq!(parse_env_ref("$FOO"), None);
        assert_eq!(parse_env_ref("literal"), None);
        assert_eq!(parse_env_ref("${"), None);
    }

    #[test]
    fn test_resolve_env_vars() {
        // SAFETY: test-only, no concurrent threads depend on this env var.
        unsafe { std::env::set_var("CLOUDGATE_TEST_VAR", "resolved_value") };
        let mut env = HashMap::new();
        env.insert("KEY".to_string(), "${CLOUDGATE_TEST_VAR}".to_string());
        env.insert("UNSET".to_string(), "${CLOUDGATE_TEST_UNSET_VAR}".to_string());
        let resolved = resolve_env_vars(&env);
        assert_eq!(resolved.get("KEY").unwrap(), "resolved_value");
        assert_eq!(resolved.get("UNSET").unwrap(), "");
        // SAFETY: test-only cleanup.
        unsafe { std::env::remove_var("CLOUDGATE_TEST_VAR") };
    }

    #[test]
    fn test_policy_defaults() {
        let config = parse_toml("");
        assert!(config.policy.require_confirm);
        assert_eq!(config.policy.call_timeout(), Duration::from_secs(30));
        assert!(config.tools.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_valid_tool_config() {
        let config = parse_toml(INSTANCE_ACTION);
        config.validate().unwrap();
        let tool = &config.tools["instance-action"];
        assert_eq!(tool.tier, 1);
        assert_eq!(tool.params["action"].param_type, ParamType::String);
        assert_eq!(tool.preview_flags.as_deref(), Some(&["--dry-run".to_string()][..]));
    }

    #[test]
    fn test_zero_call_timeout_rejected() {
        let config = parse_toml("[policy]\ncall_timeout_secs = 0\n");
        let (subject, reason) = invalid_reason(&config);
        assert_eq!(subject, "policy");
        assert!(reason.contains("call_timeout_secs"));
    }

    #[test]
    fn test_service_with_underscore_rejected() {
        let config = parse_toml(
            r#"
            [tools.bad]
            service = "com_pute"
            action = "list"
            command = "aws"
            "#,
        );
        let (subject, reason) = invalid_reason(&config);
        assert_eq!(subject, "bad");
        assert!(reason.contains("service"));
    }

    #[test]
    fn test_duplicate_service_action_rejected() {
        let config = parse_toml(
            r#"
            [tools.a]
            service = "cost"
            action = "get-budget"
            command = "aws"

            [tools.b]
            service = "cost"
            action = "get-budget"
            command = "gcloud"
            "#,
        );
        assert!(matches!(
            config.validate(),
            Err(GatewayError::DuplicateName(name)) if name == "cost:get-budget"
        ));
    }

    #[test]
    fn test_env_var_reference_required() {
        let config = parse_toml(
            r#"
            [tools.users]
            service = "iam"
            action = "list-users"
            command = "aws"

            [tools.users.env]
            AWS_SECRET_ACCESS_KEY = "literal-secret"
            "#,
        );
        let (_, reason) = invalid_reason(&config);
        assert!(reason.contains("AWS_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn test_disabled_tool_skips_validation() {
        let config = parse_toml(
            r#"
            [tools.broken]
            service = "iam"
            action = "list-users"
            command = ""
            enabled = false
            "#,
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_placeholder_must_be_declared_and_bound() {
        let config = parse_toml(
            r#"
            [tools.describe]
            service = "compute"
            action = "describe-instance"
            command = "aws"
            args = ["ec2", "describe-instances", "--instance-ids", "{instance_id}"]
            "#,
        );
        assert!(invalid_reason(&config).1.contains("undeclared"));

        let config = parse_toml(
            r#"
            [tools.describe]
            service = "compute"
            action = "describe-instance"
            command = "aws"
            args = ["ec2", "describe-instances", "--instance-ids", "{instance_id}"]

            [tools.describe.params.instance_id]
            type = "string"
            "#,
        );
        assert!(invalid_reason(&config).1.contains("required parameter"));
    }

    #[test]
    fn test_preview_flags_on_query_rejected() {
        let config = parse_toml(
            r#"
            [tools.list]
            service = "compute"
            action = "list-instances"
            command = "aws"
            mutating = false
            preview_flags = ["--dry-run"]
            "#,
        );
        assert!(invalid_reason(&config).1.contains("preview_flags"));
    }

    #[test]
    fn test_preview_success_codes_need_preview_flags() {
        let config = parse_toml(
            r#"
            [tools.stop]
            service = "compute"
            action = "stop-instances"
            command = "aws"
            preview_success_codes = [254]
            "#,
        );
        assert_eq!(
            invalid_reason(&config),
            (
                "stop".to_string(),
                "preview_success_codes require preview_flags".to_string()
            )
        );

        let config = parse_toml(
            r#"
            [tools.stop]
            service = "compute"
            action = "stop-instances"
            command = "aws"
            preview_flags = ["--dry-run"]
            preview_success_codes = [254]
            "#,
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.tools["stop"].preview_success_codes, vec![254]);
    }

    #[test]
    fn test_zero_tool_timeout_rejected() {
        let config = parse_toml(
            r#"
            [tools.list]
            service = "compute"
            action = "list-instances"
            command = "aws"
            timeout_secs = 0
            "#,
        );
        assert!(invalid_reason(&config).1.contains("timeout_secs"));
    }

    #[test]
    fn test_skill_names_filled_from_keys() {
        let config = parse_toml(
            r#"
            [skills.cost-review]
            title = "Cost review"
            steps = [
                { tool = "cost:get-budget" },
                { tool = "cost:get-forecast", policy = "optional" },
            ]
            "#,
        );
        config.validate().unwrap();
        let skills = config.skill_definitions();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "cost-review");
        assert_eq!(skills[0].steps.len(), 2);
    }

    #[test]
    fn test_unknown_top_level_section_rejected() {
        let result = GatewayConfig::from_toml_str("[servers.gh]\nslug = \"gh\"\n");
        assert!(matches!(result, Err(GatewayError::InvalidConfig(..))));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = GatewayConfig::load(Path::new("/nonexistent/cloudgate.toml")).await;
        assert!(matches!(
            result,
            Err(GatewayError::InvalidConfig(subject, _)) if subject.contains("nonexistent")
        ));
    }
}
