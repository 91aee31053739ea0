//! Query router
//!
//! Classifies a query against an ordered keyword table, confirms the
//! chosen worker answers its health check, then forwards the query to the
//! worker's completion endpoint exactly once. There is no fallback to a
//! different worker when the chosen one is down.

pub mod rules;

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::errors::MeshError;
use crate::health::HealthChecker;
use crate::registry::ServiceRegistry;
use crate::storage::settings::RouterSettings;

pub use rules::{RouteDecision, RouteRule, RuleTable};

/// A forwarded query and the worker's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedCompletion {
    pub decision: RouteDecision,
    pub content: String,
}

/// Router options
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub probe_timeout: Duration,
    pub upstream_timeout: Duration,
    pub n_predict: i32,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(1500),
            upstream_timeout: Duration::from_secs(120),
            n_predict: 512,
        }
    }
}

impl From<&RouterSettings> for RouterOptions {
    fn from(settings: &RouterSettings) -> Self {
        Self {
            probe_timeout: Duration::from_millis(settings.probe_timeout_ms),
            upstream_timeout: Duration::from_secs(settings.upstream_timeout_secs),
            n_predict: settings.n_predict,
        }
    }
}

/// Stateless query router. The URL table is fixed at construction.
#[derive(Clone)]
pub struct Router {
    table: RuleTable,
    urls: HashMap<String, Url>,
    health: HealthChecker,
    client: Client,
    n_predict: i32,
}

impl Router {
    pub fn new(
        table: RuleTable,
        urls: HashMap<String, Url>,
        health: HealthChecker,
        options: &RouterOptions,
    ) -> Result<Self, MeshError> {
        let client = Client::builder().timeout(options.upstream_timeout).build()?;
        Ok(Self {
            table,
            urls,
            health,
            client,
            n_predict: options.n_predict,
        })
    }

    /// Router over the registry's services with HTTP health probes.
    ///
    /// Workers are addressed at `worker_host`, or by service name when the
    /// router itself runs on the shared network.
    pub fn from_registry(
        registry: &ServiceRegistry,
        worker_host: Option<&str>,
        options: &RouterOptions,
    ) -> Result<Self, MeshError> {
        let urls = registry.service_urls(worker_host)?;
        let health = HealthChecker::http(options.probe_timeout)?;
        Self::new(RuleTable::default(), urls, health, options)
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    pub fn url_of(&self, service: &str) -> Option<&Url> {
        self.urls.get(service)
    }

    /// Pure classification; no I/O
    pub fn decide(&self, query: &str) -> RouteDecision {
        self.table.classify(query)
    }

    /// Classify, check health once, forward once
    pub async fn route(
        &self,
        query: &str,
        n_predict: Option<i32>,
    ) -> Result<RoutedCompletion, MeshError> {
        let decision = self.decide(query);
        let target = decision.target_service.clone();
        info!(
            target_service = %target,
            matched_keyword = ?decision.matched_keyword,
            fallback_used = decision.fallback_used,
            "Routing query"
        );

        let Some(base) = self.urls.get(&target) else {
            return Err(MeshError::ServiceUnavailable {
                service: target,
                reason: "no address configured".to_string(),
            });
        };

        let outcome = self.health.probe(base.as_str(), 1, Duration::ZERO).await;
        if !outcome.healthy {
            let reason = outcome
                .last_error
                .unwrap_or_else(|| "health check failed".to_string());
            warn!("{} is unavailable: {}", target, reason);
            return Err(MeshError::ServiceUnavailable {
                service: target,
                reason,
            });
        }

        let content = self
            .complete(&target, base, query, n_predict.unwrap_or(self.n_predict))
            .await?;
        Ok(RoutedCompletion { decision, content })
    }

    async fn complete(
        &self,
        service: &str,
        base: &Url,
        prompt: &str,
        n_predict: i32,
    ) -> Result<String, MeshError> {
        let upstream = |reason: String| MeshError::UpstreamError {
            service: service.to_string(),
            reason,
        };

        let url = base
            .join(worker_api::COMPLETION_PATH)
            .map_err(|e| upstream(e.to_string()))?;
        let request = worker_api::CompletionRequest {
            prompt: prompt.to_string(),
            n_predict,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream(format!("status {}: {}", status, body.trim())));
        }

        let completion: worker_api::CompletionResponse = response
            .json()
            .await
            .map_err(|e| upstream(format!("invalid completion body: {}", e)))?;
        Ok(completion.content)
    }
}
