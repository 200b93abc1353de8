//! GatewayMcpServer — rmcp ServerHandler backed by a Gateway.
//!
//! A thin adapter: tool listing is generated from the registry and skills,
//! and every tool call is turned into an `InvocationRequest` and rendered back
//! as text. All policy lives in the gateway.
//!
//! The gateway sits behind `Arc<RwLock<Arc<Gateway>>>` so hot reload can swap
//! in a freshly built gateway while every session keeps the outer handle.
//! Connected peers are kept so reload can broadcast tools-list-changed.

use std::sync::Arc;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{NotificationContext, Peer, RequestContext, RoleServer};
use rmcp::ErrorData as McpError;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::format::OutputFormat;
use crate::gateway::{Gateway, InvocationRequest};
use crate::registry::ToolDescriptor;
use crate::skill::SkillDefinition;

/// Shared gateway handle; hot reload swaps the inner `Arc`.
pub type GatewayHandle = Arc<RwLock<Arc<Gateway>>>;

/// Connected session peers, pruned when a notification fails.
pub type PeersHandle = Arc<tokio::sync::Mutex<Vec<Peer<RoleServer>>>>;

/// MCP server backed by a [`Gateway`].
///
/// `StreamableHttpService` calls its factory per session; each clone shares
/// the same outer handles, so a reload is visible to all sessions on their
/// next request.
#[derive(Clone)]
pub struct GatewayMcpServer {
    gateway: GatewayHandle,
    peers: PeersHandle,
}

impl GatewayMcpServer {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(RwLock::new(Arc::new(gateway))),
            peers: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    /// Handle for the hot-reload task to swap the gateway.
    pub fn gateway_handle(&self) -> GatewayHandle {
        self.gateway.clone()
    }

    /// Handle for the hot-reload task to broadcast notifications.
    pub fn peers_handle(&self) -> PeersHandle {
        self.peers.clone()
    }

    /// Snapshot of the current gateway. The lock is held only for the clone.
    async fn current(&self) -> Arc<Gateway> {
        self.gateway.read().await.clone()
    }

    /// Every invocable name as an MCP tool: tools first, then skills.
    pub async fn tools(&self) -> Vec<Tool> {
        let gateway = self.current().await;
        let mut tools: Vec<Tool> = gateway.registry().tools().map(|d| mcp_tool(d)).collect();
        tools.extend(gateway.skills().map(|s| mcp_skill(s, &gateway)));
        tools
    }

    /// Run one MCP tool call through the gateway.
    pub async fn invoke(&self, name: &str, arguments: Option<JsonObject>) -> CallToolResult {
        let gateway = self.current().await;
        let response = match InvocationRequest::from_arguments(name, arguments.unwrap_or_default()) {
            Ok(request) => gateway.invoke(request).await,
            // A bad reserved key is reported in the same envelope shape
            Err(e) => gateway.reject(name, e, OutputFormat::default()),
        };
        CallToolResult {
            content: vec![Content::text(response.render())],
            is_error: Some(response.is_error()),
            structured_content: None,
            meta: None,
        }
    }
}

fn reserved_properties(mutating: bool) -> Vec<(&'static str, Value)> {
    let mut props = Vec::with_capacity(3);
    if mutating {
        props.push((
            "dry_run",
            json!({
                "type": "boolean",
                "description": "Simulate the change without applying it"
            }),
        ));
        props.push((
            "confirm",
            json!({
                "type": "boolean",
                "description": "Confirm that the change should be applied"
            }),
        ));
    }
    props.push((
        "format",
        json!({
            "type": "string",
            "enum": ["structured", "human-readable"],
            "description": "Reply format (default: structured)"
        }),
    ));
    props
}

fn with_reserved(mut schema: Value, mutating: bool) -> Arc<JsonObject> {
    if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for (name, prop) in reserved_properties(mutating) {
            props.insert(name.to_string(), prop);
        }
    }
    Arc::new(schema.as_object().cloned().unwrap_or_default())
}

fn mcp_tool(descriptor: &ToolDescriptor) -> Tool {
    let mut description = descriptor
        .description()
        .map(str::to_string)
        .unwrap_or_else(|| descriptor.title().to_string());
    if !descriptor.aliases().is_empty() {
        description.push_str(&format!(" Aliases: {}.", descriptor.aliases().join(", ")));
    }
    description.push_str(&format!(" Tier {}.", descriptor.tier()));
    if descriptor.is_mutating() {
        description.push_str(" Mutating: requires confirm=true, or dry_run=true to preview.");
    }

    Tool {
        name: descriptor.name().to_string().into(),
        title: Some(descriptor.title().to_string()),
        description: Some(description.into()),
        input_schema: with_reserved(descriptor.schema().to_json_schema(), descriptor.is_mutating()),
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

fn mcp_skill(skill: &SkillDefinition, gateway: &Gateway) -> Tool {
    let steps: Vec<&str> = skill.steps.iter().map(|s| s.tool.as_str()).collect();
    let mut description = skill
        .description
        .clone()
        .unwrap_or_else(|| skill.title.clone());
    description.push_str(&format!(" Skill: runs {}.", steps.join(" -> ")));
    let mutating = skill.is_mutating(gateway.registry());
    if mutating {
        description.push_str(" Contains mutating steps.");
    }

    // Parameters are the skill's initial context, so any key is accepted
    let schema = json!({
        "type": "object",
        "properties": {},
        "additionalProperties": true,
    });

    Tool {
        name: skill.name.clone().into(),
        title: Some(skill.title.clone()),
        description: Some(description.into()),
        input_schema: with_reserved(schema, mutating),
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

impl ServerHandler for GatewayMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "cloudgate".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Cloudgate: schema-checked cloud operations. Mutating tools need confirm=true \
                 or dry_run=true."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: self.tools().await,
            next_cursor: None,
            meta: None,
        })
    }

    /// Gateway errors are reported in-band with `is_error`, never as
    /// protocol errors.
    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.invoke(&request.name, request.arguments).await)
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        tracing::info!("MCP client initialized, storing peer for reload notifications");
        self.peers.lock().await.push(context.peer.clone());
    }
}
