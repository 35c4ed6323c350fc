//! Argument validation against a tool's compiled input schema
//!
//! Each descriptor's JSON Schema is compiled once into an
//! [`ArgumentValidator`]. Every schema violation in an argument mapping is
//! collected before reporting, so a caller sees unknown, missing and mistyped
//! fields in one failure instead of fixing them one round-trip at a time.
//!
//! # Example
//!
//! ```rust,ignore
//! use tooling::validation::ArgumentValidator;
//!
//! let validator = ArgumentValidator::compile(&descriptor)?;
//! if let Err(err) = validator.validate(&args) {
//!     eprintln!("{}", err);
//! }
//! ```

use crate::runtime::{Arguments, ParamType, ToolDescriptor, ToolFailure};
use crate::ToolingError;
use chrono::NaiveDate;
use jsonschema::error::ValidationErrorKind;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;

/// One problem found in an argument mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Argument not declared by the tool
    Unknown(String),
    /// Required argument absent or null
    Missing(String),
    /// Argument present with the wrong type or shape
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    /// Argument has the right type but a rejected value
    InvalidValue { field: String, reason: String },
}

impl ValidationIssue {
    fn field(&self) -> &str {
        match self {
            Self::Unknown(field) | Self::Missing(field) => field,
            Self::TypeMismatch { field, .. } | Self::InvalidValue { field, .. } => field,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(field) => write!(f, "unknown field `{}`", field),
            Self::Missing(field) => write!(f, "missing required field `{}`", field),
            Self::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{}` must be {}, got {}", field, expected, found),
            Self::InvalidValue { field, reason } => write!(f, "field `{}` {}", field, reason),
        }
    }
}

/// All issues found for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub tool: String,
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "invalid arguments for {}: {}", self.tool, joined.join("; "))
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ToolFailure {
    fn from(err: ValidationError) -> Self {
        ToolFailure::validation(err.to_string())
    }
}

/// A descriptor paired with its compiled input schema
pub struct ArgumentValidator {
    descriptor: ToolDescriptor,
    schema: JSONSchema,
}

impl fmt::Debug for ArgumentValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentValidator")
            .field("tool", &self.descriptor.name)
            .finish()
    }
}

impl ArgumentValidator {
    /// Compile the descriptor's input schema
    pub fn compile(descriptor: &ToolDescriptor) -> Result<Self, ToolingError> {
        let input_schema = descriptor.input_schema();
        let schema = JSONSchema::compile(&input_schema).map_err(|e| ToolingError::Schema {
            tool: descriptor.name.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            descriptor: *descriptor,
            schema,
        })
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Validate an argument mapping
    ///
    /// Null values count as absent. Issues are reported in a stable order:
    /// unknown fields (sorted), then declared parameters in declaration order,
    /// at most one issue per field.
    pub fn validate(&self, args: &Arguments) -> Result<(), ValidationError> {
        let instance = Value::Object(
            args.iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );

        let mut issues = Vec::new();
        if let Err(errors) = self.schema.validate(&instance) {
            for error in errors {
                let path = error.instance_path.to_string();
                for issue in self.issues_for(&error.kind, &path, &error.instance) {
                    push_unique(&mut issues, issue);
                }
            }
        }

        // The schema only checks the date shape; the calendar is checked here
        for param in self.descriptor.params {
            if param.ty != ParamType::Date {
                continue;
            }
            if let Some(Value::String(text)) = instance.get(param.name) {
                if parse_iso_date(text).is_none() {
                    push_unique(&mut issues, invalid_date(param.name, text));
                }
            }
        }

        if issues.is_empty() {
            return Ok(());
        }

        issues.sort_by_key(|issue| self.order_key(issue));
        Err(ValidationError {
            tool: self.descriptor.name.to_string(),
            issues,
        })
    }

    fn issues_for(
        &self,
        kind: &ValidationErrorKind,
        path: &str,
        instance: &Value,
    ) -> Vec<ValidationIssue> {
        let field = path.trim_start_matches('/').to_string();

        match kind {
            ValidationErrorKind::AdditionalProperties { unexpected } => unexpected
                .iter()
                .map(|name| ValidationIssue::Unknown(name.clone()))
                .collect(),
            ValidationErrorKind::Required { property } => {
                vec![ValidationIssue::Missing(
                    property.as_str().unwrap_or_default().to_string(),
                )]
            }
            ValidationErrorKind::Type { .. } => {
                let expected = self
                    .descriptor
                    .param(&field)
                    .map(|p| p.ty.name())
                    .unwrap_or("object");
                vec![ValidationIssue::TypeMismatch {
                    field,
                    expected,
                    found: json_type_name(instance),
                }]
            }
            ValidationErrorKind::Enum { .. } => {
                let allowed = match self.descriptor.param(&field).map(|p| p.ty) {
                    Some(ParamType::OneOf(values)) => values.join(", "),
                    _ => String::new(),
                };
                let got = instance
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| instance.to_string());
                vec![ValidationIssue::InvalidValue {
                    field,
                    reason: format!("must be one of {}, got `{}`", allowed, got),
                }]
            }
            ValidationErrorKind::Pattern { .. } | ValidationErrorKind::Format { .. } => {
                let text = instance.as_str().unwrap_or_default().to_string();
                vec![invalid_date(&field, &text)]
            }
            other => vec![ValidationIssue::InvalidValue {
                field,
                reason: format!("{:?}", other),
            }],
        }
    }

    fn order_key(&self, issue: &ValidationIssue) -> (usize, usize, String) {
        match issue {
            ValidationIssue::Unknown(name) => (0, 0, name.clone()),
            other => {
                let position = self
                    .descriptor
                    .params
                    .iter()
                    .position(|p| p.name == other.field())
                    .unwrap_or(usize::MAX);
                (1, position, other.field().to_string())
            }
        }
    }
}

fn push_unique(issues: &mut Vec<ValidationIssue>, issue: ValidationIssue) {
    if !issues.iter().any(|existing| existing.field() == issue.field()) {
        issues.push(issue);
    }
}

fn invalid_date(field: &str, text: &str) -> ValidationIssue {
    ValidationIssue::InvalidValue {
        field: field.to_string(),
        reason: format!("must be an ISO date (YYYY-MM-DD), got `{}`", text),
    }
}

/// Parse a strict `YYYY-MM-DD` date
pub fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    if text.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn json_type_name(value: &Value) -> &'static str {
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
