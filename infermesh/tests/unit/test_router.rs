//! Router tests against mock workers

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use infermesh::errors::MeshError;
use infermesh::health::HealthChecker;
use infermesh::registry::{default_catalog, ServiceRegistry};
use infermesh::router::{Router, RouterOptions, RuleTable};

async fn worker(healthy: bool) -> MockServer {
    let server = MockServer::start().await;
    let status = if healthy { 200 } else { 503 };
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn options() -> RouterOptions {
    RouterOptions {
        probe_timeout: Duration::from_millis(500),
        upstream_timeout: Duration::from_secs(5),
        n_predict: 128,
    }
}

fn router(workers: &[(&str, &MockServer)]) -> Router {
    let urls: HashMap<String, Url> = workers
        .iter()
        .map(|(name, server)| (name.to_string(), Url::parse(&server.uri()).unwrap()))
        .collect();
    let health = HealthChecker::http(Duration::from_millis(500)).unwrap();
    Router::new(RuleTable::default(), urls, health, &options()).unwrap()
}

#[tokio::test]
async fn test_forwards_to_first_matching_rule() {
    let coder = worker(true).await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_json(json!({"prompt": "fix this code in the image", "n_predict": 128})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"content": "fixed", "tokens_predicted": 1})),
        )
        .expect(1)
        .mount(&coder)
        .await;
    let vision = worker(true).await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&vision)
        .await;

    let router = router(&[("coder", &coder), ("vision", &vision)]);
    let completion = router.route("fix this code in the image", None).await.unwrap();

    assert_eq!(completion.decision.target_service, "coder");
    assert_eq!(completion.decision.matched_keyword.as_deref(), Some("code"));
    assert!(!completion.decision.fallback_used);
    assert_eq!(completion.content, "fixed");
}

#[tokio::test]
async fn test_fallback_goes_to_agent_with_custom_budget() {
    let agent = worker(true).await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_json(json!({"prompt": "plan my week", "n_predict": 32})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "monday: rest"})))
        .expect(1)
        .mount(&agent)
        .await;

    let router = router(&[("agent", &agent)]);
    let completion = router.route("plan my week", Some(32)).await.unwrap();

    assert!(completion.decision.fallback_used);
    assert_eq!(completion.decision.target_service, "agent");
    assert_eq!(completion.content, "monday: rest");
}

#[tokio::test]
async fn test_unhealthy_target_is_unavailable_without_fallback() {
    let vision = worker(false).await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&vision)
        .await;
    let agent = worker(true).await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&agent)
        .await;

    let router = router(&[("vision", &vision), ("agent", &agent)]);
    let err = router.route("run OCR on this receipt", None).await.unwrap_err();

    match err {
        MeshError::ServiceUnavailable { service, .. } => assert_eq!(service, "vision"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_target_without_address_is_unavailable() {
    let router = router(&[]);
    let err = router.route("@voice hello", None).await.unwrap_err();
    assert_eq!(err.class(), "ServiceUnavailable");
    assert!(err.to_string().contains("voice"));
}

#[tokio::test]
async fn test_upstream_failure_is_not_retried() {
    let coder = worker(true).await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
        .expect(1)
        .mount(&coder)
        .await;

    let router = router(&[("coder", &coder)]);
    let err = router.route("write some code", None).await.unwrap_err();

    match err {
        MeshError::UpstreamError { service, reason } => {
            assert_eq!(service, "coder");
            assert!(reason.contains("500"));
            assert!(reason.contains("out of memory"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_completion_body_is_upstream_error() {
    let voice = worker(true).await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&voice)
        .await;

    let router = router(&[("voice", &voice)]);
    let err = router.route("transcribe this audio", None).await.unwrap_err();
    assert_eq!(err.class(), "UpstreamError");
}

#[tokio::test]
async fn test_decision_is_deterministic() {
    let router = router(&[]);
    for query in ["", "@coder", "image and audio", "Research papers", "hello there"] {
        assert_eq!(router.decide(query), router.decide(query));
    }
    assert_eq!(router.decide("Research papers").target_service, "coder");
    assert_eq!(router.decide("image and audio").target_service, "vision");
}

#[test]
fn test_addresses_from_registry() {
    let registry = ServiceRegistry::new(default_catalog()).unwrap();

    let local = Router::from_registry(&registry, Some("127.0.0.1"), &options()).unwrap();
    assert_eq!(local.url_of("coder").unwrap().as_str(), "http://127.0.0.1:8081/");

    let in_network = Router::from_registry(&registry, None, &options()).unwrap();
    assert_eq!(in_network.url_of("agent").unwrap().as_str(), "http://agent:8084/");
    assert!(in_network.url_of("ghost").is_none());
}
