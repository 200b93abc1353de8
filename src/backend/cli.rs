//! CLI-backed capabilities — run a provider CLI as a tool backend.
//!
//! `CliInvocation` holds the command template for one tool. `CliOperation`
//! is the `Operation` the dispatcher calls: the real run, a run with the
//! tool's own dry-run flags appended, or a projection of the command line
//! that never spawns anything.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::backend::verbs;
use crate::capability::{BackendFailure, Capability, Operation, OperationResult};
use crate::config::{resolve_env_vars, CliToolConfig};
use crate::namespace;
use crate::registry::ToolDescriptor;
use crate::schema::ParamSchema;

/// `{name}`, `{name|lower}` or `{name|upper}`.
fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z0-9_]+)(?:\|(lower|upper))?\}").expect("valid regex")
    })
}

/// Parameter names referenced by placeholders, in first-use order.
pub fn placeholder_names(args: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for arg in args {
        for caps in placeholder_re().captures_iter(arg) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Text of a parameter value as a single CLI token.
fn token_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Command template for one CLI-backed tool.
#[derive(Debug, Clone)]
pub struct CliInvocation {
    tool: String,
    command: String,
    args: Vec<String>,
    inject_flags: Vec<String>,
    /// Resolved env vars (values already extracted from `${VAR}` references)
    env: HashMap<String, String>,
}

impl CliInvocation {
    pub fn new(tool: &str, command: &str) -> Self {
        CliInvocation {
            tool: tool.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            inject_flags: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inject_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inject_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Build the argument vector for bound parameters.
    ///
    /// Order: template args with placeholders filled in, then one flag per
    /// bound parameter no placeholder consumed, then the injected flags.
    /// Flag conversion: `true` → `--name`, `false`/null → omitted, arrays →
    /// `--name a b`, anything else → `--name value`. Underscores in
    /// parameter names become hyphens.
    pub fn argv(&self, params: &Map<String, Value>) -> Result<Vec<String>, BackendFailure> {
        let mut consumed: HashSet<&str> = HashSet::new();
        let mut argv = Vec::with_capacity(self.args.len() + params.len() * 2);

        for arg in &self.args {
            let mut rendered = String::with_capacity(arg.len());
            let mut last = 0;
            for caps in placeholder_re().captures_iter(arg) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let value = params.get(name.as_str()).ok_or_else(|| {
                    BackendFailure::with_code(
                        "InvalidCommand",
                        format!(
                            "no value for placeholder '{}' in '{}'",
                            whole.as_str(),
                            self.tool
                        ),
                    )
                })?;
                consumed.insert(name.as_str());
                let text = token_text(value);
                rendered.push_str(&arg[last..whole.start()]);
                match caps.get(2).map(|m| m.as_str()) {
                    Some("lower") => rendered.push_str(&text.to_lowercase()),
                    Some("upper") => rendered.push_str(&text.to_uppercase()),
                    _ => rendered.push_str(&text),
                }
                last = whole.end();
            }
            rendered.push_str(&arg[last..]);
            argv.push(rendered);
        }

        for (key, value) in params {
            if consumed.contains(key.as_str()) {
                continue;
            }
            let flag = format!("--{}", key.replace('_', "-"));
            match value {
                Value::Bool(true) => argv.push(flag),
                Value::Bool(false) | Value::Null => {}
                Value::Array(items) => {
                    argv.push(flag);
                    argv.extend(items.iter().map(token_text));
                }
                other => {
                    argv.push(flag);
                    argv.push(token_text(other));
                }
            }
        }

        argv.extend(self.inject_flags.iter().cloned());
        Ok(argv)
    }

    /// Spawn the command (never through a shell) and collect its output.
    ///
    /// The child is killed if this future is dropped, which is what happens
    /// when the dispatcher's timeout fires. Exit codes in `accept_codes`
    /// count as success alongside 0.
    async fn run(&self, argv: Vec<String>, accept_codes: &[i32]) -> OperationResult {
        let start = Instant::now();
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let output = cmd.output().await.map_err(|e| {
            BackendFailure::with_code(
                "SpawnFailed",
                format!("failed to spawn '{}': {}", self.command, e),
            )
        })?;

        let exit_code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        tracing::info!(
            tool = %self.tool,
            command = %self.command,
            args = ?argv,
            exit_code = ?exit_code,
            duration_ms = %start.elapsed().as_millis(),
            "CLI tool invocation"
        );

        let accepted = exit_code.is_some_and(|c| accept_codes.contains(&c));
        if !output.status.success() && !accepted {
            let code = exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let message = match stderr.trim() {
                "" => format!("'{}' exited with status {}", self.command, code),
                text => text.to_string(),
            };
            return Err(BackendFailure::with_code(code, message));
        }

        if !stderr.is_empty() {
            tracing::debug!(tool = %self.tool, stderr = %stderr, "CLI tool stderr");
        }

        // Some CLIs report a successful dry run on stderr with a non-zero exit
        let text = if accepted && stdout.trim().is_empty() {
            stderr
        } else {
            stdout
        };

        // Try JSON first, fall back to text
        Ok(match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => value,
            Err(_) => json!({ "output": text.trim_end() }),
        })
    }
}

/// A command's own dry-run mode: flags to append, and the non-zero exit
/// codes that still mean the dry run succeeded (e.g. 254 for
/// `aws ec2 ... --dry-run`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRun {
    pub flags: Vec<String>,
    pub success_codes: Vec<i32>,
}

impl DryRun {
    pub fn new<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DryRun {
            flags: flags.into_iter().map(Into::into).collect(),
            success_codes: Vec::new(),
        }
    }

    pub fn with_success_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone)]
enum Mode {
    Execute,
    /// Run with the command's own dry-run flags appended.
    DryRunFlags(DryRun),
    /// Report the would-be command line without spawning anything.
    Projection,
}

/// One operation of a CLI-backed tool.
#[derive(Debug, Clone)]
pub struct CliOperation {
    invocation: Arc<CliInvocation>,
    mode: Mode,
}

#[async_trait]
impl Operation for CliOperation {
    async fn call(&self, params: &Map<String, Value>) -> OperationResult {
        let mut argv = self.invocation.argv(params)?;
        match &self.mode {
            Mode::Execute => self.invocation.run(argv, &[]).await,
            Mode::DryRunFlags(dry_run) => {
                argv.extend(dry_run.flags.iter().cloned());
                self.invocation.run(argv, &dry_run.success_codes).await
            }
            Mode::Projection => Ok(json!({
                "command": self.invocation.command,
                "args": argv,
                "executed": false,
            })),
        }
    }
}

/// Capability for a CLI invocation.
///
/// Mutating tools get a preview path: the command run in its own dry-run
/// mode when given, otherwise a projection of the command line.
pub fn capability(invocation: CliInvocation, mutating: bool, dry_run: Option<DryRun>) -> Capability {
    let invocation = Arc::new(invocation);
    let execute = CliOperation {
        invocation: invocation.clone(),
        mode: Mode::Execute,
    };
    if !mutating {
        return Capability::query(execute);
    }
    let preview = CliOperation {
        invocation,
        mode: match dry_run {
            Some(dry_run) => Mode::DryRunFlags(dry_run),
            None => Mode::Projection,
        },
    };
    Capability::mutation(execute, preview)
}

/// Build the descriptor for a `[tools.<key>]` entry.
pub fn build_tool(key: &str, config: &CliToolConfig) -> crate::Result<ToolDescriptor> {
    let name = namespace::canonical_name(&config.service, &config.action);
    let schema = ParamSchema::compile(&name, config.params.clone())?;

    let mutating = config
        .mutating
        .unwrap_or_else(|| verbs::is_likely_mutating(&config.action, config.args.as_slice()));

    let invocation = CliInvocation::new(&name, &config.command)
        .with_args(config.args.iter().cloned())
        .with_inject_flags(config.inject_flags.iter().cloned())
        .with_env(resolve_env_vars(&config.env));

    let dry_run = config.preview_flags.as_ref().map(|flags| {
        DryRun::new(flags.iter().cloned())
            .with_success_codes(config.preview_success_codes.iter().copied())
    });

    let title = config
        .title
        .clone()
        .unwrap_or_else(|| format!("{} {}", config.service, config.action));
    let mut descriptor = ToolDescriptor::new(
        &config.service,
        &config.action,
        &title,
        schema,
        capability(invocation, mutating, dry_run),
    )
    .with_tier(config.tier);
    if let Some(description) = &config.description {
        descriptor = descriptor.with_description(description);
    }
    for alias in &config.aliases {
        descriptor = descriptor.with_alias(alias);
    }
    if let Some(secs) = config.timeout_secs {
        descriptor = descriptor.with_timeout(Duration::from_secs(secs));
    }

    tracing::debug!(
        key = %key,
        tool = %name,
        command = %config.command,
        mutating,
        "built CLI tool"
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_placeholder_names() {
        let args = vec![
            "ec2".to_string(),
            "{action|lower}-instances".to_string(),
            "--instance-ids".to_string(),
            "{instance_id}".to_string(),
            "{action}".to_string(),
        ];
        assert_eq!(placeholder_names(&args), vec!["action", "instance_id"]);
        assert!(placeholder_names(&["{\"a\":1}".to_string()]).is_empty());
    }

    #[test]
    fn test_argv_fills_placeholders_and_flags() {
        let invocation = CliInvocation::new("compute_instance_action", "aws")
            .with_args(["ec2", "{action|lower}-instances", "--instance-ids", "{instance_id}"])
            .with_inject_flags(["--output", "json"]);
        let argv = invocation
            .argv(&params(json!({
                "action": "STOP",
                "instance_id": "i-0abc",
                "force": true,
                "hibernate": false,
                "region": "eu-west-1",
                "tag_keys": ["a", "b"]
            })))
            .unwrap();
        assert_eq!(
            argv,
            vec![
                "ec2",
                "stop-instances",
                "--instance-ids",
                "i-0abc",
                "--force",
                "--region",
                "eu-west-1",
                "--tag-keys",
                "a",
                "b",
                "--output",
                "json",
            ]
        );
    }

    #[test]
    fn test_argv_upper_and_numbers() {
        let invocation = CliInvocation::new("db_scale", "dbctl").with_args(["scale", "{tier|upper}"]);
        let argv = invocation
            .argv(&params(json!({"tier": "gold", "replicas": 3})))
            .unwrap();
        assert_eq!(argv, vec!["scale", "GOLD", "--replicas", "3"]);
    }

    #[test]
    fn test_argv_missing_placeholder_value() {
        let invocation = CliInvocation::new("compute_describe", "aws").with_args(["{instance_id}"]);
        let err = invocation.argv(&Map::new()).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("InvalidCommand"));
        assert!(err.message.contains("{instance_id}"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_text_output() {
        let cap = capability(
            CliInvocation::new("test_echo", "echo").with_args(["hello"]),
            false,
            None,
        );
        let Capability::Query(op) = cap else {
            panic!("expected query capability");
        };
        assert_eq!(op.call(&Map::new()).await.unwrap(), json!({"output": "hello"}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_json_output() {
        let invocation = CliInvocation::new("test_echo", "echo").with_args([r#"{"instances":[]}"#]);
        let result = invocation.run(invocation.argv(&Map::new()).unwrap(), &[]).await;
        assert_eq!(result.unwrap(), json!({"instances": []}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_backend_failure() {
        let invocation =
            CliInvocation::new("test_fail", "sh").with_args(["-c", "echo AccessDenied >&2; exit 3"]);
        let err = invocation
            .run(invocation.argv(&Map::new()).unwrap(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some("3"));
        assert_eq!(err.message, "AccessDenied");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dry_run_success_code_accepted_on_preview_only() {
        let invocation = CliInvocation::new("compute_instance_action", "sh").with_args([
            "-c",
            "echo 'An error occurred (DryRunOperation): Request would have succeeded' >&2; exit 254",
            "sh",
        ]);
        let cap = capability(
            invocation,
            true,
            Some(DryRun::new(["--dry-run"]).with_success_codes([254])),
        );
        let Capability::Mutation { apply, preview } = cap else {
            panic!("expected mutation capability");
        };
        assert_eq!(
            preview.call(&Map::new()).await.unwrap(),
            json!({"output": "An error occurred (DryRunOperation): Request would have succeeded"})
        );
        // The real run does not inherit the preview's accepted codes
        let err = apply.call(&Map::new()).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("254"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let invocation = CliInvocation::new("test_missing", "/nonexistent/cloudgate-test-cli");
        let err = invocation.run(Vec::new(), &[]).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("SpawnFailed"));
    }

    #[tokio::test]
    async fn test_projection_preview_never_spawns() {
        let cap = capability(
            CliInvocation::new("compute_terminate", "/nonexistent/cloudgate-test-cli")
                .with_args(["terminate", "{instance_id}"]),
            true,
            None,
        );
        let Capability::Mutation { preview, .. } = cap else {
            panic!("expected mutation capability");
        };
        let result = preview
            .call(&params(json!({"instance_id": "i-1"})))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({
                "command": "/nonexistent/cloudgate-test-cli",
                "args": ["terminate", "i-1"],
                "executed": false
            })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preview_flags_appended() {
        let cap = capability(
            CliInvocation::new("compute_instance_action", "echo").with_args(["{action|lower}"]),
            true,
            Some(DryRun::new(["--dry-run"])),
        );
        let Capability::Mutation { apply, preview } = cap else {
            panic!("expected mutation capability");
        };
        let p = params(json!({"action": "STOP"}));
        assert_eq!(preview.call(&p).await.unwrap(), json!({"output": "stop --dry-run"}));
        assert_eq!(apply.call(&p).await.unwrap(), json!({"output": "stop"}));
    }

    #[test]
    fn test_build_tool_from_config() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [tools.list]
            service = "compute"
            action = "list-instances"
            command = "aws"
            args = ["ec2", "describe-instances"]
            aliases = ["ec2:describe-instances"]
            tier = 2
            timeout_secs = 10

            [tools.stop]
            service = "compute"
            action = "instance-action"
            command = "aws"
            args = ["ec2", "{action|lower}-instances"]

            [tools.stop.params.action]
            type = "string"
            required = true
            "#,
        )
        .unwrap();

        let list = build_tool("list", &config.tools["list"]).unwrap();
        assert_eq!(list.name(), "compute_list_instances");
        assert!(!list.is_mutating());
        assert_eq!(list.tier(), 2);
        assert_eq!(list.timeout(), Some(Duration::from_secs(10)));
        assert_eq!(list.title(), "compute list-instances");
        assert!(list.aliases().contains(&"ec2:describe-instances".to_string()));

        // "instance-action" is not a known verb: classified as mutating
        let stop = build_tool("stop", &config.tools["stop"]).unwrap();
        assert!(stop.is_mutating());
        assert!(stop.schema().contains("action"));
    }

    #[test]
    fn test_build_tool_exec_with_trailing_query_words_is_mutating() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [tools.shell]
            service = "k8s"
            action = "pod-shell"
            command = "kubectl"
            args = ["exec", "{pod}", "--", "ls", "/var"]

            [tools.shell.params.pod]
            type = "string"
            required = true
            "#,
        )
        .unwrap();

        // "ls" after "--" is the remote command, not the kubectl verb
        let shell = build_tool("shell", &config.tools["shell"]).unwrap();
        assert_eq!(shell.name(), "k8s_pod_shell");
        assert!(shell.is_mutating());
    }
}
