//! Service health checking
//!
//! A bounded, cancellable retry loop over a pluggable liveness probe. The
//! orchestrator uses it with many attempts while a freshly started worker
//! loads its model; the router uses a single short attempt before
//! forwarding a query.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::errors::MeshError;
use crate::utils::ShutdownSignal;

/// A single liveness check against a service base URL
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, base_url: &str) -> Result<(), MeshError>;
}

/// Probe issuing `GET <base_url>/health` and expecting a 2xx status
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Create a probe whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, MeshError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self, base_url: &str) -> Result<(), MeshError> {
        let url = format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            worker_api::HEALTH_PATH
        );
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(MeshError::Internal(format!("{} returned {}", url, status)))
        }
    }
}

/// Result of a bounded probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub healthy: bool,

    /// Attempts actually made
    pub attempts: u32,

    /// Last observed error when unhealthy
    pub last_error: Option<String>,

    /// The loop stopped because the shutdown signal fired
    pub cancelled: bool,
}

impl ProbeOutcome {
    fn cancelled(attempts: u32, last_error: Option<String>) -> Self {
        Self {
            healthy: false,
            attempts,
            last_error,
            cancelled: true,
        }
    }

    fn gave_up(base_url: &str, attempts: u32, last_error: Option<String>) -> Self {
        warn!("{} not healthy after {} attempt(s)", base_url, attempts);
        Self {
            healthy: false,
            attempts,
            last_error: last_error.or_else(|| Some("no attempts made".to_string())),
            cancelled: false,
        }
    }
}

/// Bounded retry loop over a [`HealthProbe`]
#[derive(Clone)]
pub struct HealthChecker {
    probe: Arc<dyn HealthProbe>,
}

impl HealthChecker {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self { probe }
    }

    /// Checker backed by [`HttpProbe`]
    pub fn http(timeout: Duration) -> Result<Self, MeshError> {
        Ok(Self::new(Arc::new(HttpProbe::new(timeout)?)))
    }

    /// Probe without cancellation
    pub async fn probe(&self, base_url: &str, attempts: u32, interval: Duration) -> ProbeOutcome {
        self.probe_until(base_url, attempts, interval, &ShutdownSignal::never())
            .await
    }

    /// Probe up to `attempts` times, waiting `interval` after each failed
    /// attempt.
    ///
    /// Returns on the first success. With a non-zero `interval` the whole
    /// loop runs against a deadline of `attempts * interval`: a check still
    /// in flight when it passes is abandoned, sleeps are clamped to it, and
    /// a service that never becomes healthy is given up on exactly then.
    /// With a zero `interval` each check is bounded only by the probe's own
    /// timeout. The loop is cut short when `shutdown` fires.
    pub async fn probe_until(
        &self,
        base_url: &str,
        attempts: u32,
        interval: Duration,
        shutdown: &ShutdownSignal,
    ) -> ProbeOutcome {
        let deadline = (!interval.is_zero()).then(|| Instant::now() + interval * attempts);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if shutdown.is_triggered() {
                return ProbeOutcome::cancelled(attempt - 1, last_error);
            }

            let result = tokio::select! {
                result = self.check_before(base_url, deadline) => result,
                _ = shutdown.triggered() => {
                    return ProbeOutcome::cancelled(attempt, last_error);
                }
            };
            match result {
                Ok(()) => {
                    info!("{} healthy after {} attempt(s)", base_url, attempt);
                    return ProbeOutcome {
                        healthy: true,
                        attempts: attempt,
                        last_error: None,
                        cancelled: false,
                    };
                }
                Err(e) => {
                    debug!("Health attempt {}/{} for {} failed: {}", attempt, attempts, base_url, e);
                    last_error = Some(e.to_string());
                }
            }

            if let Some(deadline) = deadline {
                let wake = (Instant::now() + interval).min(deadline);
                tokio::select! {
                    _ = sleep_until(wake) => {}
                    _ = shutdown.triggered() => {
                        return ProbeOutcome::cancelled(attempt, last_error);
                    }
                }
                if Instant::now() >= deadline {
                    return ProbeOutcome::gave_up(base_url, attempt, last_error);
                }
            }
        }

        ProbeOutcome::gave_up(base_url, attempts, last_error)
    }

    async fn check_before(&self, base_url: &str, deadline: Option<Instant>) -> Result<(), MeshError> {
        match deadline {
            Some(deadline) => timeout_at(deadline, self.probe.check(base_url))
                .await
                .map_err(|_| MeshError::Internal(format!("{} did not answer in time", base_url)))?,
            None => self.probe.check(base_url).await,
        }
    }
}
