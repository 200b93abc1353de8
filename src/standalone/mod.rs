//! MCP surface for the gateway: the rmcp server handler and config hot reload.

pub mod hot_reload;
pub mod server;
