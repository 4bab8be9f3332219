// tests/fetcher.rs
use std::time::Duration;

use board_rss_archiver::ingest::fetcher::{FeedClient, FeedFetch, FetchError, RetryPolicy};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const XML: &str = r#"<?xml version="1.0"?><rss></rss>"#;

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        timeout_ms: 200,
        max_retries,
        backoff_multiplier: 2.0,
        base_delay_ms: 10,
        max_delay_ms: 50,
    }
}

async fn hits(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

#[tokio::test]
async fn returns_body_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rssBbsNtt.do"))
        .and(query_param("bbsNo", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_string(XML))
        .expect(1)
        .mount(&server)
        .await;

    let client = FeedClient::new(fast_policy(2));
    let body = client
        .fetch(&format!("{}/rssBbsNtt.do?bbsNo=25", server.uri()))
        .await
        .expect("fetch ok");
    assert_eq!(body, XML);
}

#[tokio::test]
async fn not_found_fails_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = FeedClient::new(fast_policy(2));
    let err = client.fetch(&server.uri()).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Status {
            code: 404,
            reason: "Not Found".into()
        }
    );
    assert_eq!(err.to_string(), "HTTP 404: Not Found");
    assert_eq!(hits(&server).await, 1);
}

#[tokio::test]
async fn retries_transient_503_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(XML))
        .mount(&server)
        .await;

    let client = FeedClient::new(fast_policy(2));
    let body = client.fetch(&server.uri()).await.expect("second attempt ok");
    assert_eq!(body, XML);
    assert_eq!(hits(&server).await, 2);
}

#[tokio::test]
async fn timeout_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(XML)
                .set_delay(Duration::from_millis(1_000)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(XML))
        .mount(&server)
        .await;

    let client = FeedClient::new(fast_policy(1));
    let body = client.fetch(&server.uri()).await.expect("retry ok");
    assert_eq!(body, XML);
    assert_eq!(hits(&server).await, 2);
}

#[tokio::test]
async fn exhausted_retries_surface_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = FeedClient::new(fast_policy(2));
    let err = client.fetch(&server.uri()).await.unwrap_err();
    assert!(matches!(err, FetchError::Status { code: 503, .. }));
    // first attempt + 2 retries
    assert_eq!(hits(&server).await, 3);
}

#[tokio::test]
async fn zero_retries_means_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = FeedClient::new(fast_policy(0));
    let err = client.fetch(&server.uri()).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(hits(&server).await, 1);
}

#[tokio::test]
async fn refused_connection_is_a_transient_network_error() {
    // Nothing listens on port 9 (discard) in test environments.
    let client = FeedClient::new(fast_policy(0));
    let err = client.fetch("http://127.0.0.1:9/rss").await.unwrap_err();
    assert!(
        matches!(err, FetchError::Connection(_) | FetchError::Timeout { .. }),
        "got {err:?}"
    );
    assert!(err.is_transient());
}
