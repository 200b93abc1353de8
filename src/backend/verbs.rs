//! Verb-based mutating classifier for CLI-backed tools that do not declare
//! `mutating` explicitly.
//!
//! Best effort only. Unknown verbs classify as mutating, so an unrecognised
//! command is always gated.

/// Verbs that only read provider state.
const QUERY_VERBS: &[&str] = &[
    "list", "get", "describe", "show", "view", "inspect", "status", "info", "ls", "head",
    "search", "find", "lookup", "query", "count", "estimate", "forecast", "logs", "tail",
    "whoami", "version", "diff", "history",
];

/// Verbs that change provider state.
const MUTATING_VERBS: &[&str] = &[
    "create", "delete", "remove", "rm", "update", "set", "put", "apply", "patch", "modify",
    "replace", "destroy", "terminate", "stop", "start", "reboot", "restart", "resize", "scale",
    "attach", "detach", "associate", "disassociate", "authorize", "revoke", "grant", "tag",
    "untag", "enable", "disable", "import", "copy", "cp", "mv", "sync", "deploy", "rollback",
    "restore", "snapshot", "invoke", "run", "exec", "send", "publish", "purge",
];

fn classify(token: &str) -> Option<bool> {
    let lower = token.to_lowercase();
    let verb = lower.split(['-', '_']).next().unwrap_or_default();
    for candidate in [lower.as_str(), verb] {
        if QUERY_VERBS.contains(&candidate) {
            return Some(false);
        }
        if MUTATING_VERBS.contains(&candidate) {
            return Some(true);
        }
    }
    None
}

/// Leading subcommand tokens of an argument template: everything before the
/// first flag, `--` separator or `{placeholder}`. Later tokens are values
/// (file names, remote commands) and never name the operation.
pub fn command_path<S: AsRef<str>>(args: &[S]) -> &[S] {
    let end = args
        .iter()
        .position(|t| {
            let t = t.as_ref();
            t.starts_with('-') || t.contains('{')
        })
        .unwrap_or(args.len());
    &args[..end]
}

/// Classify a CLI-backed tool as likely mutating from its action name and
/// argument template.
///
/// The action is checked first, then the command path is walked from last
/// to first (the last token is most specific) and the first recognised verb
/// wins. Compound tokens match on their leading segment
/// (`describe-instances` → `describe`). A mutating verb from either source
/// wins; with no recognised verb at all the tool is mutating.
///
/// ```
/// use nimbus_cloudgate::backend::verbs::is_likely_mutating;
///
/// assert!(!is_likely_mutating("list-instances", &["ec2", "describe-instances"]));
/// assert!(is_likely_mutating("pod-shell", &["exec", "{pod}", "--", "ls", "/var"]));
/// assert!(is_likely_mutating("frob", &["frobnicate"]));
/// ```
pub fn is_likely_mutating<S: AsRef<str>>(action: &str, args: &[S]) -> bool {
    let from_path = command_path(args)
        .iter()
        .rev()
        .find_map(|t| classify(t.as_ref()));
    match (classify(action), from_path) {
        (Some(true), _) | (_, Some(true)) => true,
        (Some(false), _) | (_, Some(false)) => false,
        (None, None) => true,
    }
}
