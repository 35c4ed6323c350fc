//! Runtime types for tool execution
//!
//! This module provides the data model shared by the tool registry and both
//! transport bindings: static tool descriptors, call requests tagged with a
//! correlation identifier, and call results.

pub mod error;
pub mod policy;

pub use error::{FailureKind, ToolFailure};
pub use policy::{BindHost, NonLoopbackHost, PolicySnapshot, PolicyViolation};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

/// Argument mapping of a call; keys are unique by construction
pub type Arguments = Map<String, Value>;

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    /// ISO calendar date (`YYYY-MM-DD`) carried as a string
    Date,
    /// String restricted to a fixed set of values
    OneOf(&'static [&'static str]),
}

impl ParamType {
    /// JSON Schema fragment for this type
    pub fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Date => json!({
                "type": "string",
                "format": "date",
                "pattern": r"^\d{4}-\d{2}-\d{2}$",
            }),
            Self::OneOf(values) => json!({ "type": "string", "enum": values }),
        }
    }

    /// Short name used in validation messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::String | Self::OneOf(_) => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Date => "date",
        }
    }
}

/// A declared tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: false,
            description,
        }
    }
}

/// Static description of one tool
///
/// Descriptors are built once when the registry is constructed and never
/// change for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: &'static str,

    /// Human-readable description
    pub description: &'static str,

    /// Declared input parameters
    pub params: &'static [ParamSpec],

    /// Whether the tool changes state in the external store
    pub mutates: bool,
}

impl ToolDescriptor {
    /// Look up a declared parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema for the argument mapping
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in self.params {
            let mut schema = param.ty.json_schema();
            if let Value::Object(ref mut obj) = schema {
                obj.insert("description".into(), Value::from(param.description));
            }
            properties.insert(param.name.to_string(), schema);
            if param.required {
                required.push(Value::from(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Catalog entry as advertised to protocol clients
    pub fn to_catalog_entry(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
            "annotations": {
                "readOnlyHint": !self.mutates,
                "destructiveHint": self.mutates,
            },
        })
    }
}

/// Transport-assigned identifier matching a response to its request
///
/// Numeric ids keep their JSON form, so ids beyond `i64` or with a fraction
/// are echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    Number(Number),
    String(String),
}

impl CorrelationId {
    /// The id as an `i64`, when it is an integer in range
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            Self::String(_) => None,
        }
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for CorrelationId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// A request to execute a tool
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    /// Correlation identifier assigned by the transport
    pub id: CorrelationId,

    /// Tool identifier
    pub tool: String,

    /// Argument mapping
    pub args: Arguments,
}

impl CallRequest {
    /// Create a new call request with no arguments
    pub fn new(id: impl Into<CorrelationId>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            args: Arguments::new(),
        }
    }

    /// Add an argument to the request
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a tool call
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    /// Structured success payload
    Success(Map<String, Value>),
    /// Typed failure
    Failure(ToolFailure),
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure kind, if the call failed
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }

    /// Success payload, if the call succeeded
    pub fn payload(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Success(map) => Some(map),
            Self::Failure(_) => None,
        }
    }

    /// Wire representation of the result
    ///
    /// Failures are wrapped as `{"error": {...}}` so both outcomes share a
    /// single object shape on every transport.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(map) => Value::Object(map.clone()),
            Self::Failure(failure) => json!({ "error": failure }),
        }
    }
}

impl From<ToolFailure> for CallResult {
    fn from(failure: ToolFailure) -> Self {
        Self::Failure(failure)
    }
}
