//! Parameter schemas and the binder/validator.
//!
//! A tool's parameter schema is declared as a map of [`ParamSpec`]s and
//! compiled once at registration into a [`ParamSchema`]: patterns are compiled
//! to regexes and declared defaults are checked against their own constraints.
//! Binding a request then only evaluates the compiled validators.

use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Argument keys lifted out of every call by the gateway. A tool may not
/// declare a parameter with one of these names.
pub const RESERVED_PARAMS: &[&str] = &["dry_run", "confirm", "format"];

/// Declared JSON type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// JSON type name of a runtime value, as reported in `got`.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declaration of a single parameter: type, requiredness, default, constraints.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Enumerated allowed values.
    #[serde(rename = "enum")]
    pub allowed: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    /// Regex a string value must match (unanchored unless the pattern anchors).
    pub pattern: Option<String>,
    /// Minimum length of a string (chars) or array (items).
    pub min_length: Option<usize>,
    /// Maximum length of a string (chars) or array (items).
    pub max_length: Option<usize>,
}

impl ParamSpec {
    /// An optional parameter of the given type with no constraints.
    pub fn new(param_type: ParamType) -> Self {
        ParamSpec {
            param_type,
            required: false,
            default: None,
            description: None,
            allowed: None,
            minimum: None,
            maximum: None,
            pattern: None,
            min_length: None,
            max_length: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(values.into_iter().collect());
        self
    }

    pub fn range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn matching(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn length(mut self, min_length: Option<usize>, max_length: Option<usize>) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }
}

#[derive(Debug, Clone)]
struct CompiledParam {
    name: String,
    spec: ParamSpec,
    pattern: Option<Regex>,
}

impl CompiledParam {
    /// Check a present, non-null value against type and constraints.
    fn check(&self, value: &Value) -> crate::Result<()> {
        let spec = &self.spec;
        let invalid = |expected: String, got: String| GatewayError::InvalidParameter {
            name: self.name.clone(),
            expected,
            got,
        };

        if !spec.param_type.matches(value) {
            return Err(invalid(
                spec.param_type.as_str().to_string(),
                type_name(value).to_string(),
            ));
        }

        if let Some(allowed) = &spec.allowed {
            if !allowed.contains(value) {
                let listed: Vec<String> = allowed.iter().map(Value::to_string).collect();
                return Err(invalid(
                    format!("one of [{}]", listed.join(", ")),
                    value.to_string(),
                ));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = spec.minimum {
                if n < min {
                    return Err(invalid(format!("a value >= {}", min), value.to_string()));
                }
            }
            if let Some(max) = spec.maximum {
                if n > max {
                    return Err(invalid(format!("a value <= {}", max), value.to_string()));
                }
            }
        }

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(len) = length {
            if let Some(min) = spec.min_length {
                if len < min {
                    return Err(invalid(format!("length >= {}", min), format!("length {}", len)));
                }
            }
            if let Some(max) = spec.max_length {
                if len > max {
                    return Err(invalid(format!("length <= {}", max), format!("length {}", len)));
                }
            }
        }

        if let (Some(regex), Value::String(s)) = (&self.pattern, value) {
            if !regex.is_match(s) {
                return Err(invalid(
                    format!("a string matching /{}/", regex.as_str()),
                    value.to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Compiled parameter schema for one tool. Parameters are kept in name order
/// so validation and error reporting are deterministic.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    params: Vec<CompiledParam>,
}

impl ParamSchema {
    /// A schema that accepts only the empty parameter object.
    pub fn empty() -> Self {
        ParamSchema::default()
    }

    /// Compile parameter declarations for the tool named `tool`.
    ///
    /// Fails with `InvalidConfig` for reserved or duplicate names, bad regexes,
    /// `minimum > maximum`, a required parameter that also declares a default,
    /// or a default that violates its own constraints.
    pub fn compile(
        tool: &str,
        specs: impl IntoIterator<Item = (String, ParamSpec)>,
    ) -> crate::Result<Self> {
        let mut by_name: BTreeMap<String, ParamSpec> = BTreeMap::new();
        for (name, spec) in specs {
            if RESERVED_PARAMS.contains(&name.as_str()) {
                return Err(GatewayError::InvalidConfig(
                    tool.to_string(),
                    format!("parameter name '{}' is reserved", name),
                ));
            }
            if by_name.insert(name.clone(), spec).is_some() {
                return Err(GatewayError::InvalidConfig(
                    tool.to_string(),
                    format!("parameter '{}' declared twice", name),
                ));
            }
        }

        let mut params = Vec::with_capacity(by_name.len());
        for (name, spec) in by_name {
            let pattern = match &spec.pattern {
                Some(p) => Some(Regex::new(p).map_err(|e| {
                    GatewayError::InvalidConfig(
                        tool.to_string(),
                        format!("parameter '{}' has an invalid pattern: {}", name, e),
                    )
                })?),
                None => None,
            };

            if let (Some(min), Some(max)) = (spec.minimum, spec.maximum) {
                if min > max {
                    return Err(GatewayError::InvalidConfig(
                        tool.to_string(),
                        format!("parameter '{}' has minimum {} > maximum {}", name, min, max),
                    ));
                }
            }

            if spec.required && spec.default.is_some() {
                return Err(GatewayError::InvalidConfig(
                    tool.to_string(),
                    format!("parameter '{}' is required and cannot declare a default", name),
                ));
            }

            let compiled = CompiledParam {
                name,
                spec,
                pattern,
            };
            if let Some(default) = compiled.spec.default.as_ref().filter(|d| !d.is_null()) {
                compiled.check(default).map_err(|e| {
                    GatewayError::InvalidConfig(
                        tool.to_string(),
                        format!("default for '{}' is invalid: {}", compiled.name, e),
                    )
                })?;
            }
            params.push(compiled);
        }

        Ok(ParamSchema { params })
    }

    /// Bind a raw parameter object against this schema.
    ///
    /// Declared parameters are checked in name order: absent (or null) and
    /// required fails with `MissingParameter`, absent and optional takes the
    /// declared default, present is type- and constraint-checked. Keys the
    /// schema does not declare then fail with `UnexpectedParameter`.
    /// Binding an already-bound object returns it unchanged.
    pub fn bind(&self, raw: &Map<String, Value>) -> crate::Result<Map<String, Value>> {
        let mut bound = Map::new();

        for param in &self.params {
            match raw.get(&param.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    param.check(value)?;
                    bound.insert(param.name.clone(), value.clone());
                }
                None if param.spec.required => {
                    return Err(GatewayError::MissingParameter {
                        name: param.name.clone(),
                    });
                }
                None => {
                    if let Some(default) = &param.spec.default {
                        bound.insert(param.name.clone(), default.clone());
                    }
                }
            }
        }

        if let Some(extra) = raw.keys().find(|k| !self.contains(k)) {
            return Err(GatewayError::UnexpectedParameter {
                name: extra.clone(),
            });
        }

        Ok(bound)
    }

    /// Whether the schema declares a parameter with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Convert to a JSON Schema object suitable for MCP tool registration.
    pub fn to_json_schema(&self) -> Value {
        let mut props = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let spec = &param.spec;
            let mut schema = serde_json::json!({ "type": spec.param_type.as_str() });
            if let Some(desc) = &spec.description {
                schema["description"] = Value::String(desc.clone());
            }
            if let Some(default) = &spec.default {
                schema["default"] = default.clone();
            }
            if let Some(allowed) = &spec.allowed {
                schema["enum"] = Value::Array(allowed.clone());
            }
            if let Some(min) = spec.minimum {
                schema["minimum"] = serde_json::json!(min);
            }
            if let Some(max) = spec.maximum {
                schema["maximum"] = serde_json::json!(max);
            }
            if let Some(pattern) = &spec.pattern {
                schema["pattern"] = Value::String(pattern.clone());
            }
            let (min_key, max_key) = match spec.param_type {
                ParamType::Array => ("minItems", "maxItems"),
                _ => ("minLength", "maxLength"),
            };
            if let Some(min) = spec.min_length {
                schema[min_key] = serde_json::json!(min);
            }
            if let Some(max) = spec.max_length {
                schema[max_key] = serde_json::json!(max);
            }
            props.insert(param.name.clone(), schema);

            if spec.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        let mut schema = serde_json::json!({
            "type": "object",
            "properties": props,
            "additionalProperties": false,
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }
}
