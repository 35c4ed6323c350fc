//! Failure kinds surfaced to callers as structured tool results

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a failed tool call
///
/// `TransportFault` never appears inside a `CallResult`; it is reported by
/// the stream binding when a frame cannot be decoded, and is listed here so
/// every failure the control-plane can surface shares one code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed or unknown arguments
    ValidationError,
    /// Mutation attempted while disallowed
    PolicyDenied,
    /// Referenced entity does not exist or is soft-deleted
    NotFound,
    /// The external query/mutation interface failed
    UpstreamError,
    /// Malformed frame or protocol violation
    TransportFault,
}

impl FailureKind {
    /// Get the canonical error code for this failure kind
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError => "E_VALIDATION",
            Self::PolicyDenied => "E_POLICY",
            Self::NotFound => "E_NOT_FOUND",
            Self::UpstreamError => "E_UPSTREAM",
            Self::TransportFault => "E_TRANSPORT",
        }
    }

    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::PolicyDenied => "policy_denied",
            Self::NotFound => "not_found",
            Self::UpstreamError => "upstream_error",
            Self::TransportFault => "transport_fault",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed tool failure
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ToolFailure {
    /// Failure kind
    pub kind: FailureKind,

    /// Human-readable message, safe to show to the caller
    pub message: String,

    /// Policy rule that triggered a denial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl ToolFailure {
    /// Create a failure of the given kind
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            rule: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    /// Upstream failures never carry collaborator detail to the caller
    pub fn upstream() -> Self {
        Self::new(FailureKind::UpstreamError, "upstream service failed")
    }

    /// Create a policy denial naming the rule that fired
    pub fn policy_denied(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::PolicyDenied,
            message: message.into(),
            rule: Some(rule.into()),
        }
    }

    /// Get the canonical error code
    pub fn error_code(&self) -> &'static str {
        self.kind.error_code()
    }
}
