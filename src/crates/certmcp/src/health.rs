//! Health reporting for the network bindings
//!
//! `/healthz` answers with a [`HealthReport`]; the supervisor's liveness
//! probe treats any non-`unhealthy` report as alive. A registry that answers
//! slower than [`SLOW_CHECK_MS`] reports `degraded`.

use crate::registry::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;
use tooling::runtime::Arguments;

/// Registry response time above which the check is degraded
pub const SLOW_CHECK_MS: u64 = 500;

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Individual component check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub response_time_ms: u64,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>, message: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: Some(message.into()),
            response_time_ms,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            response_time_ms,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            response_time_ms,
        }
    }
}

/// Liveness report served at `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<ComponentHealth>,
    /// Payload of the `health` tool
    pub server: Map<String, Value>,
    pub timestamp: i64,
}

impl HealthReport {
    pub fn new(checks: Vec<ComponentHealth>, server: Map<String, Value>) -> Self {
        let status = if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            checks,
            server,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Build the liveness report for a running binding
pub async fn liveness_report(registry: &ToolRegistry, sessions: usize) -> HealthReport {
    let start = Instant::now();
    let result = registry.invoke("health", &Arguments::new()).await;
    let elapsed = start.elapsed().as_millis() as u64;

    let (registry_check, server) = match result.payload() {
        Some(payload) => (
            registry_check(registry.list_tools().len(), elapsed),
            payload.clone(),
        ),
        None => (
            ComponentHealth::unhealthy("registry", "health tool failed", elapsed),
            Map::new(),
        ),
    };

    let transport_check = ComponentHealth::healthy("transport", format!("{} sessions", sessions), 0);
    HealthReport::new(vec![registry_check, transport_check], server)
}

fn registry_check(tools: usize, elapsed_ms: u64) -> ComponentHealth {
    if elapsed_ms > SLOW_CHECK_MS {
        ComponentHealth::degraded(
            "registry",
            format!("{} tools, slow response", tools),
            elapsed_ms,
        )
    } else {
        ComponentHealth::healthy("registry", format!("{} tools", tools), elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collaborators, MemoryStore};
    use std::sync::Arc;
    use tooling::runtime::PolicySnapshot;

    #[test]
    fn test_overall_status() {
        let ok = ComponentHealth::healthy("a", "OK", 1);
        let bad = ComponentHealth::unhealthy("b", "down", 1);
        assert_eq!(HealthReport::new(vec![ok.clone()], Map::new()).status, HealthStatus::Healthy);
        let report = HealthReport::new(vec![ok, bad], Map::new());
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.is_alive());
    }

    #[test]
    fn test_slow_registry_is_degraded_but_alive() {
        let fast = registry_check(11, 3);
        assert_eq!(fast.status, HealthStatus::Healthy);

        let slow = registry_check(11, SLOW_CHECK_MS + 1);
        assert_eq!(slow.status, HealthStatus::Degraded);
        assert_eq!(slow.message.as_deref(), Some("11 tools, slow response"));

        let transport = ComponentHealth::healthy("transport", "0 sessions", 0);
        let report = HealthReport::new(vec![slow, transport], Map::new());
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.is_alive());
        assert_eq!(serde_json::to_value(&report).unwrap()["status"], "degraded");
    }

    #[tokio::test]
    async fn test_liveness_report() {
        let registry = ToolRegistry::new(
            Collaborators::memory(Arc::new(MemoryStore::new())),
            Arc::new(PolicySnapshot::default()),
        );
        let report = liveness_report(&registry, 2).await;
        assert!(report.is_alive());
        assert_eq!(report.server["name"], "certificate-management");
        assert_eq!(report.checks[1].message.as_deref(), Some("2 sessions"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
