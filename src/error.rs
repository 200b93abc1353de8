//! Error taxonomy for Cloudgate gateway operations.

use thiserror::Error;

/// Main error type for Cloudgate operations.
///
/// Every variant maps to a stable machine-readable kind via
/// [`GatewayError::kind`], which is what callers see in `error.kind`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// No canonical name or alias matches the requested tool
    #[error("unknown tool: '{0}'")]
    UnknownTool(String),

    /// A canonical name or alias is already taken (registration time only)
    #[error("duplicate tool name or alias: '{0}'")]
    DuplicateName(String),

    /// A required parameter was not supplied
    #[error("missing required parameter '{name}'")]
    MissingParameter { name: String },

    /// A parameter failed its type or constraint check
    #[error("invalid parameter '{name}': expected {expected}, got {got}")]
    InvalidParameter {
        name: String,
        expected: String,
        got: String,
    },

    /// A parameter was supplied that the schema does not declare
    #[error("unexpected parameter '{name}'")]
    UnexpectedParameter { name: String },

    /// A mutating tool was called without confirmation under a strict policy
    #[error(
        "'{tool}' changes cloud state and requires confirmation. \
         Retry with confirm=true to execute it, or dry_run=true to preview the effect"
    )]
    ConfirmationRequired { tool: String },

    /// The backend did not answer within the call timeout
    #[error("call to '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// A failure surfaced by a backend capability
    #[error("backend error from '{tool}': {message}")]
    Backend {
        tool: String,
        code: Option<String>,
        message: String,
    },

    /// A skill finished but one or more optional steps failed
    #[error("skill '{skill}' completed with failed optional steps: {}", failed_steps.join(", "))]
    PartialSkillFailure {
        skill: String,
        failed_steps: Vec<String>,
    },

    /// A skill run was cancelled before all required steps ran
    #[error("skill '{0}' was cancelled before completion")]
    Cancelled(String),

    /// Invalid configuration for a named tool, skill or policy section
    #[error("invalid config for '{0}': {1}")]
    InvalidConfig(String, String),
}

impl GatewayError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::UnknownTool(_) => "UnknownToolError",
            GatewayError::DuplicateName(_) => "DuplicateNameError",
            GatewayError::MissingParameter { .. } => "MissingParameterError",
            GatewayError::InvalidParameter { .. } => "InvalidParameterError",
            GatewayError::UnexpectedParameter { .. } => "UnexpectedParameterError",
            GatewayError::ConfirmationRequired { .. } => "ConfirmationRequiredError",
            GatewayError::Timeout { .. } => "TimeoutError",
            GatewayError::Backend { .. } => "BackendError",
            GatewayError::PartialSkillFailure { .. } => "PartialSkillFailure",
            GatewayError::Cancelled(_) => "CancelledError",
            GatewayError::InvalidConfig(..) => "InvalidConfigError",
        }
    }

    /// Backend error code, when the backend supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            GatewayError::Backend { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// True for validation and gating errors: the call never reached a backend
    /// and repeating it unchanged cannot succeed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            GatewayError::UnknownTool(_)
                | GatewayError::MissingParameter { .. }
                | GatewayError::InvalidParameter { .. }
                | GatewayError::UnexpectedParameter { .. }
                | GatewayError::ConfirmationRequired { .. }
        )
    }
}

/// Result type alias for Cloudgate operations
pub type Result<T> = std::result::Result<T, GatewayError>;
