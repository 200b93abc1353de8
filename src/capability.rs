//! Backend capability contract.
//!
//! A capability is the backend side of a tool: the code that talks to a cloud
//! provider. The gateway never probes a backend for optional methods. Instead
//! each tool carries a [`Capability`] variant that says what it can do:
//! a read-only query has one operation, a mutation has an `apply` operation
//! and a side-effect-free `preview` operation used for dry runs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Failure surfaced by a backend operation.
///
/// This is a local type (not `GatewayError`) that the dispatcher maps to
/// `GatewayError::Backend` together with the tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// Provider error code, e.g. `"UnauthorizedOperation"` or an exit status.
    pub code: Option<String>,
    pub message: String,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        BackendFailure {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendFailure {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Result of a single backend operation.
pub type OperationResult = std::result::Result<Value, BackendFailure>;

/// One callable backend operation, invoked with already-bound parameters.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn call(&self, params: &Map<String, Value>) -> OperationResult;
}

/// What a tool's backend can do. The variant decides `is_mutating`, and a
/// preview path exists exactly when the tool mutates.
#[derive(Clone)]
pub enum Capability {
    /// Read-only query; safe to run on any call.
    Query(Arc<dyn Operation>),
    /// State-changing action with a read-only preview for dry runs.
    Mutation {
        apply: Arc<dyn Operation>,
        preview: Arc<dyn Operation>,
    },
}

impl Capability {
    pub fn query(op: impl Operation + 'static) -> Self {
        Capability::Query(Arc::new(op))
    }

    pub fn mutation(apply: impl Operation + 'static, preview: impl Operation + 'static) -> Self {
        Capability::Mutation {
            apply: Arc::new(apply),
            preview: Arc::new(preview),
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, Capability::Mutation { .. })
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Query(_) => f.write_str("Capability::Query"),
            Capability::Mutation { .. } => f.write_str("Capability::Mutation"),
        }
    }
}

/// Adapter turning an async closure into an [`Operation`].
///
/// Useful for in-process backends and tests:
///
/// ```
/// use nimbus_cloudgate::capability::{Capability, FnOperation};
///
/// let cap = Capability::query(FnOperation::new(|_params| async {
///     Ok(serde_json::json!({"instances": []}))
/// }));
/// assert!(!cap.is_mutating());
/// ```
pub struct FnOperation<F> {
    f: F,
}

impl<F, Fut> FnOperation<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OperationResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        FnOperation { f }
    }
}

#[async_trait]
impl<F, Fut> Operation for FnOperation<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OperationResult> + Send + 'static,
{
    async fn call(&self, params: &Map<String, Value>) -> OperationResult {
        (self.f)(params.clone()).await
    }
}
