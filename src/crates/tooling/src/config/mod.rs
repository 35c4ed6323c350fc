//! Configuration management utilities
//!
//! - `ConfigBuilder` trait for layered configuration (defaults, persisted, env)
//! - Environment variable loading with proper error handling
//!
//! # Example
//!
//! ```rust,ignore
//! use tooling::config::{collect_prefixed, parse_bool};
//!
//! let env = collect_prefixed("CERT_MCP_");
//! let allow_write = env.get("allow_write").and_then(|v| parse_bool(v));
//! ```

mod builder;
mod env;

pub use builder::ConfigBuilder;
pub use env::{
    build_env_key, collect_prefixed, collect_prefixed_from, get_env, get_env_bool, parse_bool,
};
