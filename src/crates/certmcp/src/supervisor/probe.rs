//! Liveness probing of a supervised control-plane

use crate::health::HealthReport;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Checks whether the control-plane at `url` is alive
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// `Ok(())` when alive; otherwise a short reason
    async fn check(&self, url: &str) -> Result<(), String>;
}

/// Probe that fetches `/healthz` and inspects the report
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn check(&self, url: &str) -> Result<(), String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }

        let report: HealthReport = response
            .json()
            .await
            .map_err(|e| format!("unreadable health report: {}", e))?;
        if report.is_alive() {
            Ok(())
        } else {
            Err(format!("reported {}", report.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_not_alive() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(Duration::from_millis(500)).unwrap();
        let result = probe.check(&format!("http://{}/healthz", addr)).await;
        assert!(result.unwrap_err().contains("request failed"));
    }
}
