//! Health checker tests

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::ScriptedProbe;
use infermesh::errors::MeshError;
use infermesh::health::{HealthChecker, HealthProbe};
use infermesh::utils::ShutdownSignal;

const DEAD_URL: &str = "http://127.0.0.1:9";

/// Fails a fixed number of times, then reports healthy
struct FlakyProbe {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl HealthProbe for FlakyProbe {
    async fn check(&self, _base_url: &str) -> Result<(), MeshError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(MeshError::Internal(format!("loading model ({})", call)))
        } else {
            Ok(())
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_never_healthy_gives_up_after_attempts_times_interval() {
    let probe = Arc::new(ScriptedProbe::healthy(&[]));
    let checker = HealthChecker::new(probe.clone());

    let start = Instant::now();
    let outcome = checker.probe(DEAD_URL, 5, Duration::from_secs(2)).await;

    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert!(!outcome.healthy);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.attempts, 5);
    assert_eq!(probe.calls(), 5);
    assert_eq!(outcome.last_error.as_deref(), Some("Internal error: connection refused"));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_checks_count_against_the_same_bound() {
    let probe = Arc::new(ScriptedProbe::healthy(&[]).stalling(Duration::from_secs(2)));
    let checker = HealthChecker::new(probe.clone());

    let start = Instant::now();
    let outcome = checker.probe(DEAD_URL, 30, Duration::from_secs(2)).await;

    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert!(!outcome.healthy);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.attempts, 15);
    assert_eq!(probe.calls(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_check_in_flight_at_the_deadline_is_abandoned() {
    let probe = Arc::new(ScriptedProbe::healthy(&[]).stalling(Duration::from_secs(7)));
    let checker = HealthChecker::new(probe.clone());

    let start = Instant::now();
    let outcome = checker.probe(DEAD_URL, 3, Duration::from_secs(2)).await;

    assert_eq!(start.elapsed(), Duration::from_secs(6));
    assert!(!outcome.healthy);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.last_error.unwrap().contains("did not answer in time"));
}

#[tokio::test(start_paused = true)]
async fn test_returns_on_first_success() {
    let probe = Arc::new(FlakyProbe {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let checker = HealthChecker::new(probe.clone());

    let start = Instant::now();
    let outcome = checker.probe(DEAD_URL, 30, Duration::from_secs(2)).await;

    assert!(outcome.healthy);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(start.elapsed(), Duration::from_secs(4));
    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cuts_the_wait_short() {
    let probe = Arc::new(ScriptedProbe::healthy(&[]));
    let checker = HealthChecker::new(probe.clone());
    let (trigger, shutdown) = ShutdownSignal::new();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.trigger();
    });

    let start = Instant::now();
    let outcome = checker
        .probe_until(DEAD_URL, 30, Duration::from_secs(2), &shutdown)
        .await;

    assert!(outcome.cancelled);
    assert!(!outcome.healthy);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test]
async fn test_single_attempt_does_not_wait() {
    let probe = Arc::new(ScriptedProbe::healthy(&[]));
    let checker = HealthChecker::new(probe.clone());

    let outcome = checker.probe(DEAD_URL, 1, Duration::ZERO).await;
    assert!(!outcome.healthy);
    assert_eq!(probe.calls(), 1);
}

#[tokio::test]
async fn test_http_probe_healthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let checker = HealthChecker::http(Duration::from_secs(1)).unwrap();
    let outcome = checker.probe(&server.uri(), 3, Duration::ZERO).await;

    assert!(outcome.healthy);
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn test_http_probe_non_2xx_is_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let checker = HealthChecker::http(Duration::from_secs(1)).unwrap();
    let outcome = checker.probe(&server.uri(), 2, Duration::ZERO).await;

    assert!(!outcome.healthy);
    assert_eq!(outcome.attempts, 2);
    assert!(outcome.last_error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_http_probe_unreachable() {
    let checker = HealthChecker::http(Duration::from_millis(500)).unwrap();
    let outcome = checker.probe(DEAD_URL, 1, Duration::ZERO).await;
    assert!(!outcome.healthy);
    assert!(outcome.last_error.is_some());
}
