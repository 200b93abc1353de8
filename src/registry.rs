//! ToolRegistry — canonical tool name to descriptor, plus the alias index.
//!
//! The registry is assembled through [`RegistryBuilder`] at startup and is
//! immutable once built, so concurrent lookups need no locking. Reconfiguration
//! builds a whole new registry rather than mutating this one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::capability::Capability;
use crate::error::GatewayError;
use crate::namespace::{self, AliasIndex};
use crate::schema::ParamSchema;

/// Everything the gateway knows about one tool. Immutable after registration.
#[derive(Debug)]
pub struct ToolDescriptor {
    name: String,
    service: String,
    action: String,
    /// Accepted surface names besides the canonical name, in declaration order.
    aliases: Vec<String>,
    title: String,
    description: Option<String>,
    /// Operational risk/complexity class. Informational only; never enforced.
    tier: u8,
    schema: ParamSchema,
    capability: Capability,
    /// Per-tool override of the policy call timeout.
    timeout: Option<Duration>,
}

impl ToolDescriptor {
    /// Describe a tool for `service`/`action`. The canonical name and the
    /// colon alias are derived from the pair.
    pub fn new(
        service: &str,
        action: &str,
        title: &str,
        schema: ParamSchema,
        capability: Capability,
    ) -> Self {
        ToolDescriptor {
            name: namespace::canonical_name(service, action),
            service: service.to_string(),
            action: action.to_string(),
            aliases: vec![namespace::colon_alias(service, action)],
            title: title.to_string(),
            description: None,
            tier: 1,
            schema,
            capability,
            timeout: None,
        }
    }

    /// Add an extra surface name (e.g. a legacy spelling).
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_tier(mut self, tier: u8) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tier(&self) -> u8 {
        self.tier
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn is_mutating(&self) -> bool {
        self.capability.is_mutating()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Canonical name followed by every alias, without duplicates.
    pub fn surface_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![self.name.as_str()];
        for alias in &self.aliases {
            if !names.contains(&alias.as_str()) {
                names.push(alias.as_str());
            }
        }
        names
    }
}

/// Frozen map from canonical name to descriptor with its alias index.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolDescriptor>>,
    index: AliasIndex,
    /// Canonical names in registration order, for stable listings.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Resolve any surface name to its descriptor.
    pub fn resolve(&self, name: &str) -> crate::Result<&Arc<ToolDescriptor>> {
        let canonical = namespace::resolve(&self.index, name)?;
        self.tools
            .get(canonical)
            .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))
    }

    /// Resolve any surface name to its canonical name.
    pub fn canonical(&self, name: &str) -> crate::Result<&str> {
        namespace::resolve(&self.index, name)
    }

    /// Whether any descriptor answers to `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All descriptors in registration order.
    pub fn tools(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Startup-time registry assembly. [`RegistryBuilder::build`] freezes it.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: ToolRegistry,
}

impl RegistryBuilder {
    /// Register a descriptor.
    ///
    /// Fails with `DuplicateName` if its canonical name or any alias is
    /// already taken, and with `InvalidConfig` if service or action is empty.
    /// A failed registration leaves the builder unchanged.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> crate::Result<()> {
        if descriptor.service.is_empty() || descriptor.action.is_empty() {
            return Err(GatewayError::InvalidConfig(
                descriptor.name.clone(),
                "tool service and action must be non-empty".to_string(),
            ));
        }

        let names: Vec<String> = descriptor
            .surface_names()
            .into_iter()
            .map(String::from)
            .collect();
        if let Some(taken) = names.iter().find(|n| self.registry.index.contains_key(*n)) {
            return Err(GatewayError::DuplicateName(taken.clone()));
        }

        let canonical = descriptor.name.clone();
        for name in names {
            self.registry.index.insert(name, canonical.clone());
        }
        tracing::debug!(
            tool = %canonical,
            mutating = descriptor.is_mutating(),
            tier = descriptor.tier,
            "registered tool"
        );
        self.registry.order.push(canonical.clone());
        self.registry.tools.insert(canonical, Arc::new(descriptor));
        Ok(())
    }

    /// Whether a surface name is already taken.
    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Freeze the registry.
    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}
