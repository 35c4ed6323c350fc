//! Transport bindings
//!
//! The binding is chosen once at startup from [`ResolvedConfig::transport`]:
//!
//! - [`stdio`] - framed request/response over the process's stdin/stdout
//! - [`sse`] - event-stream binding, results pushed per session as they finish
//! - [`http`] - single-shot `POST /mcp` request/response
//!
//! Network listeners only ever bind loopback addresses.

pub mod http;
pub mod sse;
pub mod stdio;

use crate::config::{ResolvedConfig, TransportKind};
use crate::error::TransportError;
use crate::protocol::Dispatcher;
use crate::shutdown::ShutdownCoordinator;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

/// Largest accepted inbound frame
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Interval between SSE keep-alive comments
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// How long in-flight calls may run after the listener closes
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Refuse any address that is not on the loopback interface
pub fn ensure_loopback(addr: SocketAddr) -> Result<(), TransportError> {
    if addr.ip().is_loopback() {
        Ok(())
    } else {
        Err(TransportError::NonLoopback(addr.to_string()))
    }
}

/// Bind a loopback TCP listener
pub async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, TransportError> {
    ensure_loopback(addr)?;
    TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Request logging for the HTTP bindings
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::DEBUG)
                .include_headers(false),
        )
}

/// Count of tool calls still executing on a network binding
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    count: Arc<AtomicUsize>,
}

/// Decrements the in-flight count when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InFlight {
    pub fn enter(&self) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            count: self.count.clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until no call is running or `deadline` passes
    ///
    /// Returns `true` when every call finished.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let guard = tooling::async_utils::timeout::TimeoutGuard::new(deadline);
        while self.count() > 0 {
            if guard.is_expired() {
                warn!(in_flight = self.count(), "Abandoning calls still running after drain deadline");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

/// Run the configured binding until shutdown
pub async fn serve(
    config: &ResolvedConfig,
    dispatcher: Dispatcher,
    shutdown: ShutdownCoordinator,
) -> Result<(), TransportError> {
    match config.transport {
        TransportKind::Stdio => stdio::serve_stdio(&dispatcher, &shutdown).await,
        TransportKind::Sse => {
            let listener = bind_listener(config.bind_addr()).await?;
            info!(addr = %config.bind_addr(), "Event-stream binding listening");
            sse::serve(listener, dispatcher, shutdown).await
        }
        TransportKind::StreamableHttp => {
            let listener = bind_listener(config.bind_addr()).await?;
            info!(addr = %config.bind_addr(), "HTTP binding listening");
            http::serve(listener, dispatcher, shutdown).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_loopback() {
        assert!(ensure_loopback("127.0.0.1:8000".parse().unwrap()).is_ok());
        assert!(ensure_loopback("[::1]:8000".parse().unwrap()).is_ok());
        let err = ensure_loopback("0.0.0.0:8000".parse().unwrap()).unwrap_err();
        assert_eq!(err.error_code(), "E_NON_LOOPBACK");
    }

    #[tokio::test]
    async fn test_bind_listener_refuses_wildcard() {
        let err = bind_listener("0.0.0.0:0".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, TransportError::NonLoopback(_)));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = bind_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = first.local_addr().unwrap();
        let err = bind_listener(addr).await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_in_flight_drain() {
        let in_flight = InFlight::default();
        let guard = in_flight.enter();
        assert_eq!(in_flight.count(), 1);
        assert!(!in_flight.drain(Duration::from_millis(50)).await);

        let waiter = {
            let in_flight = in_flight.clone();
            tokio::spawn(async move { in_flight.drain(Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
