//! Timeout utilities for async operations
//!
//! Provides timeout wrappers and deadline guards. The supervisor uses these
//! to bound the startup liveness probe and the graceful shutdown window.

use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout as tokio_timeout, Instant};

/// Execute a fallible async operation with a timeout
///
/// # Example
///
/// ```rust,ignore
/// use tooling::async_utils::timeout::with_timeout;
/// use std::time::Duration;
///
/// let status = with_timeout(Duration::from_secs(5), child.wait()).await;
/// ```
pub async fn with_timeout<F, T, E>(duration: Duration, operation: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio_timeout(duration, operation).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(error)) => Err(TimeoutError::OperationFailed(error)),
        Err(_elapsed) => Err(TimeoutError::Timeout(duration)),
    }
}

/// Error type for timeout operations
#[derive(Debug)]
pub enum TimeoutError<E> {
    /// Operation completed but failed
    OperationFailed(E),
    /// Operation timed out
    Timeout(Duration),
}

impl<E> TimeoutError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl<E: std::fmt::Display> std::fmt::Display for TimeoutError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
            TimeoutError::Timeout(d) => write!(f, "Operation timed out after {:?}", d),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TimeoutError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimeoutError::OperationFailed(e) => Some(e),
            TimeoutError::Timeout(_) => None,
        }
    }
}

/// Deadline shared by several awaits
///
/// The clock starts on creation; each `execute` gets only the time that is
/// left, so a sequence of steps is bounded as a whole.
///
/// # Example
///
/// ```rust,ignore
/// use tooling::async_utils::timeout::TimeoutGuard;
/// use std::time::Duration;
///
/// let guard = TimeoutGuard::new(Duration::from_secs(10));
/// while !guard.is_expired() {
///     if probe.check(&endpoint).await.is_ok() {
///         break;
///     }
///     tokio::time::sleep(Duration::from_millis(200)).await;
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    deadline: Instant,
    duration: Duration,
}

impl TimeoutGuard {
    /// Start a deadline `duration` from now
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
            duration,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left, or `None` once the deadline has passed
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.deadline {
            None
        } else {
            Some(self.deadline.duration_since(now))
        }
    }

    /// The original timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Execute an operation bounded by the remaining time
    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T, TimeoutError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        match self.remaining() {
            Some(remaining) => with_timeout(remaining, operation).await,
            None => Err(TimeoutError::Timeout(self.duration)),
        }
    }
}
