//! Capability descriptors and the provider trait.
//!
//! A *capability* is a named, independently invocable operation with a
//! declared parameter schema.  A *provider* is a worker that implements one
//! or more capabilities.  Providers are registered with the
//! [`CapabilityRegistry`](crate::registry::CapabilityRegistry) and invoked by
//! the [`Dispatcher`](crate::dispatcher::Dispatcher).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

/// JSON type expected for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Bool,
    Array,
    Object,
    /// Any JSON value except `null`.
    Any,
}

impl ParamKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => !value.is_null(),
        }
    }
}

/// A single declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Declared parameter schema of a capability.
///
/// Validation is deliberately shallow: required parameters must be present
/// and non-null, declared parameters must have the declared JSON type, and
/// undeclared parameters are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub params: Vec<ParamSpec>,
}

impl ParamSchema {
    /// An empty schema that accepts any object.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builder: add a required parameter.
    pub fn required(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            required: true,
            description: String::new(),
        });
        self
    }

    /// Builder: add an optional parameter.
    pub fn optional(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
        });
        self
    }

    /// Names of all required parameters.
    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    /// Check `params` against the schema.
    ///
    /// `null` is accepted as an empty parameter object.
    pub fn validate(&self, capability: &str, params: &Value) -> Result<()> {
        let invalid = |reason: String| KernelError::InvalidParams {
            capability: capability.to_string(),
            reason,
        };

        let empty = serde_json::Map::new();
        let object = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(invalid(format!(
                    "parameters must be a JSON object, got {}",
                    json_type_name(other)
                )));
            }
        };

        for spec in &self.params {
            match object.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(invalid(format!("missing required parameter `{}`", spec.name)));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(invalid(format!(
                        "parameter `{}` expected {:?}, got {}",
                        spec.name,
                        spec.kind,
                        json_type_name(value)
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Static description of one capability as declared by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Unique capability name (e.g. `"search_prospects"`).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Declared parameter schema.
    pub param_schema: ParamSchema,
    /// Whether the capability is long-running and meant for async dispatch.
    pub is_async: bool,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_schema: ParamSchema::empty(),
            is_async: false,
        }
    }

    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.param_schema = schema;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// A worker that can execute one or more named capabilities.
///
/// Implementations must be cheap to share (`Arc<dyn CapabilityProvider>`)
/// and safe to call concurrently.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Stable, unique provider identifier.
    fn id(&self) -> &str;

    /// Human-readable provider name.
    fn name(&self) -> &str {
        self.id()
    }

    /// The capabilities this provider implements.
    fn capabilities(&self) -> Vec<CapabilityDescriptor>;

    /// Execute `capability` with already-validated `params`.
    async fn invoke(&self, capability: &str, params: Value) -> Result<Value>;

    /// Lightweight liveness check used by the health monitor.
    async fn ping(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
