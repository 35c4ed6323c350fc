//! Tool Registry
//!
//! A fixed table from tool name to descriptor and handler tag, built once
//! from [`catalog::CATALOG`]. Every call runs the same pipeline:
//!
//! 1. look up the descriptor (unknown tools are validation failures)
//! 2. validate the argument mapping against the compiled input schema
//! 3. gate mutating tools on the policy snapshot
//! 4. run the handler against the collaborators
//! 5. redact the payload
//!
//! Redaction lives here rather than in handlers so no handler can skip it.

pub mod catalog;
mod handlers;

pub use catalog::{ToolEntry, ToolKind, CATALOG};
pub use handlers::SERVER_NAME;

use crate::error::StoreError;
use crate::store::Collaborators;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tooling::logging::{sanitize_for_logging, sanitize_pii_for_logging, timed};
use tooling::runtime::{Arguments, CallRequest, CallResult, PolicySnapshot, ToolDescriptor, ToolFailure};
use tooling::validation::ArgumentValidator;
use tracing::{debug, error, info, warn};

pub(crate) type HandlerResult = Result<Map<String, Value>, HandlerError>;

/// Failure raised inside a handler, before it is turned into a caller-facing value
#[derive(Debug)]
pub(crate) enum HandlerError {
    Tool(ToolFailure),
    Store(StoreError),
    Encode(String),
    NoMutationStore,
}

impl From<ToolFailure> for HandlerError {
    fn from(failure: ToolFailure) -> Self {
        Self::Tool(failure)
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl HandlerError {
    /// Caller-facing failure; upstream detail stays in the server log
    fn into_failure(self, tool: &str) -> ToolFailure {
        match self {
            Self::Tool(failure) => failure,
            Self::Store(err @ StoreError::NotFound { .. }) => ToolFailure::not_found(err.to_string()),
            Self::Store(StoreError::Invalid(message)) => ToolFailure::validation(message),
            Self::Store(err) => {
                error!(tool, error = %err, code = err.error_code(), "Upstream collaborator failed");
                ToolFailure::upstream()
            }
            Self::Encode(message) => {
                error!(tool, error = %message, "Failed to encode tool result");
                ToolFailure::upstream()
            }
            Self::NoMutationStore => {
                error!(tool, "No mutation interface configured");
                ToolFailure::upstream()
            }
        }
    }
}

/// The tool registry shared by every transport binding
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<&'static str, ToolEntry>>,
    validators: Arc<HashMap<&'static str, ArgumentValidator>>,
    stores: Collaborators,
    policy: Arc<PolicySnapshot>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &format!("{} tools", self.tools.len()))
            .field("policy", &self.policy)
            .finish()
    }
}

impl ToolRegistry {
    /// Build the registry over the given collaborators
    pub fn new(stores: Collaborators, policy: Arc<PolicySnapshot>) -> Self {
        let tools: HashMap<_, _> = CATALOG
            .iter()
            .map(|entry| (entry.descriptor.name, *entry))
            .collect();

        let mut validators = HashMap::new();
        for entry in CATALOG {
            match ArgumentValidator::compile(&entry.descriptor) {
                Ok(validator) => {
                    validators.insert(entry.descriptor.name, validator);
                }
                Err(err) => {
                    error!(tool = entry.descriptor.name, error = %err, "Failed to compile input schema")
                }
            }
        }

        info!(
            tools = tools.len(),
            schemas = validators.len(),
            allow_write = policy.allow_write,
            redact_pii = policy.redact_pii,
            max_bytes = policy.max_bytes,
            "Initialized tool registry"
        );

        Self {
            tools: Arc::new(tools),
            validators: Arc::new(validators),
            stores,
            policy,
        }
    }

    /// Policy snapshot the registry enforces
    pub fn policy(&self) -> &PolicySnapshot {
        &self.policy
    }

    /// Every descriptor, in catalog order
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        CATALOG.iter().map(|entry| entry.descriptor).collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|entry| &entry.descriptor)
    }

    /// Run one call through the full pipeline
    pub async fn call(&self, request: &CallRequest) -> CallResult {
        debug!(correlation_id = %request.id, tool = %request.tool, "Dispatching call");
        self.invoke(&request.tool, &request.args).await
    }

    /// Invoke a tool by name
    pub async fn invoke(&self, tool: &str, args: &Arguments) -> CallResult {
        timed(tool, self.invoke_inner(tool, args)).await
    }

    async fn invoke_inner(&self, tool: &str, args: &Arguments) -> CallResult {
        let Some(entry) = self.tools.get(tool) else {
            warn!(tool, "Unknown tool requested");
            return ToolFailure::validation(format!("unknown tool `{}`", tool)).into();
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            let rendered = Value::Object(args.clone()).to_string();
            let sanitized = if self.policy.redact_pii {
                sanitize_pii_for_logging(&rendered)
            } else {
                sanitize_for_logging(&rendered)
            };
            debug!(tool, args = %sanitized, "Tool arguments");
        }

        let Some(validator) = self.validators.get(tool) else {
            error!(tool, "No compiled input schema");
            return ToolFailure::upstream().into();
        };
        if let Err(err) = validator.validate(args) {
            debug!(tool, error = %err, "Rejected arguments");
            return ToolFailure::from(err).into();
        }

        if entry.descriptor.mutates {
            if let Err(violation) = self.policy.authorize_mutation(tool) {
                warn!(tool, rule = %violation.rule, "Mutation denied by policy");
                return ToolFailure::policy_denied(violation.rule, violation.message).into();
            }
        }

        match handlers::dispatch(entry.kind, &self.stores, &self.policy, args).await {
            Ok(payload) => CallResult::Success(self.policy.redact(payload)),
            Err(err) => err.into_failure(tool).into(),
        }
    }
}
