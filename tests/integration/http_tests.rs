//! Integration tests for the HTTP transport
//!
//! These tests use wiremock to create mock HTTP servers and run real
//! requests through the engine end-to-end.

use std::time::Duration;
use swarm_requests::config::{parse_config, UserAgentConfig};
use swarm_requests::{
    Backoff, Engine, Failure, FailureKind, HttpTransport, Payload, ResponseCache,
    RetryStrategy, ThresholdLimits, TransportError,
};
use tempfile::TempDir;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates an engine with no pacing and quick retries
fn create_test_engine() -> Engine {
    let transport = HttpTransport::new(&UserAgentConfig::default(), None)
        .expect("Failed to build HTTP client");
    Engine::builder(transport)
        .threshold(ThresholdLimits::unpaced(4))
        .retry_policy(RetryStrategy::strict().with_backoff(Backoff::Constant(
            Duration::from_millis(10),
        )))
        .build()
}

#[tokio::test]
async fn test_swarm_against_mock_server() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such page"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let engine = create_test_engine();
    let targets = vec![
        format!("{}/ok", base_url),
        format!("{}/gone", base_url),
        format!("{}/ok", base_url),
    ];

    let mut swarm = engine.swarm(&targets, true);
    let first = swarm.next().await.unwrap().unwrap();
    assert_eq!(first.text(), "fine");

    let second = swarm.next().await.unwrap().unwrap_err();
    assert_eq!(second.kind(), FailureKind::Permanent);
    assert_eq!(second.status(), Some(404));
    assert_eq!(second.url(), targets[1]);
    assert_eq!(second.response().unwrap().body, b"no such page".to_vec());

    assert!(swarm.next().await.unwrap().is_ok());
    assert!(swarm.next().await.is_none());
}

#[tokio::test]
async fn test_response_cache_answers_repeat_requests() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("cached body"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = ResponseCache::open(dir.path()).unwrap();
    let transport = HttpTransport::new(&UserAgentConfig::default(), None).unwrap();
    let engine = Engine::builder(transport)
        .threshold(ThresholdLimits::unpaced(2))
        .short_circuit(cache.clone())
        .preprocessor(cache)
        .build();

    let url = format!("{}/page", mock_server.uri());
    let fresh = engine.one(&url).await.unwrap();
    assert_eq!(fresh.attempts(), 1);

    let cached = engine.one(&url).await.unwrap();
    assert_eq!(cached.attempts(), 0);
    assert_eq!(cached.text(), "cached body");
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let mock_server = MockServer::start().await;

    // Registered first, so it answers until it has been used twice
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .mount(&mock_server)
        .await;

    let engine = create_test_engine();
    let response = engine
        .one(format!("{}/busy", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(response.text(), "done");
    assert_eq!(response.attempts(), 3);
}

#[tokio::test]
async fn test_links_feed_a_nested_swarm() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    r#"<html><head><title>Home</title></head><body>
                    <a href="/page1">Page 1</a>
                    <a href="page2#top">Page 2</a>
                    <a href="mailto:someone@example.com">Mail</a>
                    </body></html>"#,
                )
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;
    for page in ["/page1", "/page2"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let engine = create_test_engine();
    let home = engine.one(format!("{}/", base_url)).await.unwrap();
    assert!(home.is_html());
    assert_eq!(home.title(), Some("Home"));

    let links: Vec<String> = home.links().iter().map(|u| u.to_string()).collect();
    assert_eq!(
        links,
        vec![format!("{}/page1", base_url), format!("{}/page2", base_url)]
    );

    let mut nested = engine.swarm(home.links(), true);
    assert_eq!(nested.next().await.unwrap().unwrap().text(), "/page1");
    assert_eq!(nested.next().await.unwrap().unwrap().text(), "/page2");
}

#[tokio::test]
async fn test_cookie_session_is_shared() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string("user=me"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=abc; Path=/"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let engine = create_test_engine();
    engine
        .one(Payload::post(format!("{}/login", base_url), "user=me"))
        .await
        .unwrap();

    let private = format!("{}/private", base_url);
    let results: Vec<_> = futures::StreamExt::collect(engine.swarm([&private, &private], false)).await;
    for result in results {
        assert_eq!(result.unwrap().text(), "secret");
    }
}

#[tokio::test]
async fn test_payload_timeout_surfaces_as_transport_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let transport = HttpTransport::new(&UserAgentConfig::default(), None).unwrap();
    let engine = Engine::builder(transport)
        .threshold(ThresholdLimits::unpaced(1))
        .retry_policy(RetryStrategy::none())
        .build();

    let payload = Payload::get(format!("{}/slow", mock_server.uri()))
        .with_timeout(Duration::from_millis(100));
    let err = engine.one(payload).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::PolicyExhausted);
    assert_eq!(
        err.failure(),
        Some(&Failure::Transport(TransportError::Timeout))
    );
}

#[tokio::test]
async fn test_engine_from_config_sends_user_agent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/whoami"))
        .and(header("user-agent", "TestClient/1.0 (+https://example.com/bot)"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = parse_config(
        r#"
[engine]
workers = 2
timeout-ms = 5000

[threshold]
max-in-flight = 2
min-interval-ms = 0

[retry]
preset = "none"

[user-agent]
name = "TestClient"
version = "1.0"
contact-url = "https://example.com/bot"
"#,
    )
    .unwrap();

    let engine = Engine::from_config(&config).unwrap();
    assert_eq!(engine.worker_count(), 2);

    let response = engine
        .one(format!("{}/whoami", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}
