//! Shared building blocks for the certificate control-plane
//!
//! This crate holds the pieces of the control-plane that perform no network
//! or database I/O, so they can be unit tested in isolation and reused by the
//! server, the supervisor and the debug console alike.
//!
//! # Modules
//!
//! - `runtime` - Tool descriptors, call requests/results and failure kinds
//! - `runtime::policy` - The security policy engine (mutation gate, redaction, byte cap)
//! - `validation` - Argument validation against each tool's compiled JSON Schema
//! - `config` - Environment variable helpers and the `ConfigBuilder` trait
//! - `logging` - Structured logging helpers and a size-rotated log sink
//! - `async_utils` - Timeout wrappers and deadline guards

pub mod async_utils;
pub mod config;
pub mod logging;
pub mod runtime;
pub mod validation;

use thiserror::Error;

/// Errors that can occur in the tooling crate
#[derive(Debug, Error)]
pub enum ToolingError {
    /// General error with message
    #[error("Tooling error: {0}")]
    General(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A tool's input schema failed to compile
    #[error("Invalid input schema for {tool}: {message}")]
    Schema { tool: String, message: String },
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
