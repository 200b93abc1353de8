//! Tool naming and alias resolution for Cloudgate.
//!
//! Every tool is addressed by a canonical `service_action` name (hyphens in the
//! action become underscores, e.g. `compute_instance_action`) and by a colon
//! alias that keeps the action verbatim (e.g. `compute:instance-action`).
//! Resolution is exact and case-sensitive.

use std::collections::HashMap;

use crate::error::GatewayError;

/// Alias index: every accepted surface name (canonical names included) mapped
/// to the canonical registry key.
pub type AliasIndex = HashMap<String, String>;

/// Build the canonical name for a service/action pair.
/// E.g., service="compute", action="instance-action" -> "compute_instance_action"
pub fn canonical_name(service: &str, action: &str) -> String {
    format!("{}_{}", service, action.replace('-', "_"))
}

/// Build the colon alias for a service/action pair.
/// E.g., service="compute", action="instance-action" -> "compute:instance-action"
pub fn colon_alias(service: &str, action: &str) -> String {
    format!("{}:{}", service, action)
}

/// Resolve any accepted surface name to its canonical name.
///
/// Pure lookup over the alias index; a canonical name resolves to itself.
/// Absent names fail with `UnknownTool`, never with a near match.
pub fn resolve<'a>(index: &'a AliasIndex, name: &str) -> crate::Result<&'a str> {
    index
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> AliasIndex {
        let canonical = canonical_name("compute", "instance-action");
        let mut index = AliasIndex::new();
        index.insert(canonical.clone(), canonical.clone());
        index.insert(colon_alias("compute", "instance-action"), canonical);
        index
    }

    #[test]
    fn test_canonical_name_replaces_hyphens() {
        assert_eq!(
            canonical_name("compute", "instance-action"),
            "compute_instance_action"
        );
        assert_eq!(canonical_name("cost", "get_budget"), "cost_get_budget");
    }

    #[test]
    fn test_colon_alias_keeps_action() {
        assert_eq!(
            colon_alias("compute", "instance-action"),
            "compute:instance-action"
        );
    }

    #[test]
    fn test_resolve_alias_and_canonical() {
        let index = index();
        assert_eq!(
            resolve(&index, "compute:instance-action").unwrap(),
            "compute_instance_action"
        );
        // Canonical resolution is idempotent
        let canonical = resolve(&index, "compute_instance_action").unwrap();
        assert_eq!(resolve(&index, canonical).unwrap(), canonical);
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let index = index();
        assert!(matches!(
            resolve(&index, "Compute:Instance-Action"),
            Err(GatewayError::UnknownTool(name)) if name == "Compute:Instance-Action"
        ));
    }

    #[test]
    fn test_resolve_no_partial_match() {
        let index = index();
        assert!(matches!(
            resolve(&index, "compute:instance"),
            Err(GatewayError::UnknownTool(_))
        ));
        assert!(matches!(
            resolve(&index, "foo:bar"),
            Err(GatewayError::UnknownTool(name)) if name == "foo:bar"
        ));
    }
}
