//! Async utilities for common async patterns
//!
//! - Timeout wrappers and deadline guards
//!
//! The control-plane performs no retries of its own; callers decide whether
//! to retry a failed tool call.

pub mod timeout;

pub use timeout::{with_timeout, TimeoutError, TimeoutGuard};
