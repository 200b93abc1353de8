//! Cloudgate — schema-checked, mutation-gated cloud tool gateway.
//!
//! Every cloud operation is a tool with a declared parameter schema and a
//! capability (query, or mutation with apply and preview paths). Calls are
//! resolved by canonical name or alias, bound against the schema, passed
//! through the mutation gate and dispatched under a timeout. Skills chain
//! tools into ordered, partially-tolerant runs. The gateway is exposed over
//! MCP by `standalone::server`.

pub mod backend;
pub mod capability;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod gate;
pub mod gateway;
pub mod namespace;
pub mod observe;
pub mod registry;
pub mod schema;
pub mod skill;
pub mod standalone;

#[cfg(test)]
mod test_support;

pub use capability::{BackendFailure, Capability, FnOperation, Operation, OperationResult};
pub use config::{parse_env_ref, resolve_env_vars, CliToolConfig, GatewayConfig, PolicyConfig};
pub use dispatch::{DispatchResult, Dispatcher};
pub use error::{GatewayError, Result};
pub use format::{Envelope, ErrorBody, Outcome, OutputFormat, ResponseStatus};
pub use gate::{MutationDecision, MutationGate};
pub use gateway::{Gateway, GatewayBuilder, InvocationRequest, Response};
pub use observe::{CallEvent, CallSink, CallStatus, TracingSink};
pub use registry::{RegistryBuilder, ToolDescriptor, ToolRegistry};
pub use schema::{ParamSchema, ParamSpec, ParamType};
pub use skill::{
    InputSource, ProgressEvent, SkillDefinition, SkillHandle, SkillRequest, SkillRun,
    SkillStatus, SkillStep, StepPolicy,
};
pub use standalone::hot_reload::run_hot_reload;
pub use standalone::server::GatewayMcpServer;
