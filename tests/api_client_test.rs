//! Data API client integration tests using wiremock

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vitalgate::api::HealthApiClient;
use vitalgate::error::{error_kind, ErrorKind, VitalgateError};

fn client_for(server: &MockServer) -> HealthApiClient {
    HealthApiClient::with_client(reqwest::Client::new(), &format!("{}/developer", server.uri()))
}

#[tokio::test]
async fn test_get_json_sends_bearer_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/developer/v1/activity/sleep"))
        .and(header("authorization", "Bearer tok-1"))
        .and(query_param("start", "2024-01-01T00:00:00+00:00"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-RateLimit-Limit", "100")
                .insert_header("X-RateLimit-Remaining", "99")
                .set_body_json(json!({"records": [{"id": "s1"}], "next_token": "n2"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let body = client
        .get_json(
            "/v1/activity/sleep",
            &[("start".to_string(), "2024-01-01T00:00:00+00:00".to_string())],
            "tok-1",
        )
        .await
        .unwrap();

    assert_eq!(body["records"][0]["id"], "s1");
    assert_eq!(body["next_token"], "n2");
    let rate = client.rate_limit();
    assert_eq!(rate.limit, Some(100));
    assert_eq!(rate.remaining, Some(99));
    assert!(rate.observed_at.is_some());
}

#[tokio::test]
async fn test_rate_limited_reports_reset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("X-RateLimit-Remaining", "0")
                .insert_header("X-RateLimit-Reset", "30"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_json("/v1/cycle", &[], "tok").await.unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::RateLimited);
    match err.downcast_ref::<VitalgateError>() {
        Some(VitalgateError::RateLimited { retry_after_secs }) => {
            assert_eq!(*retry_after_secs, Some(30))
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
    assert_eq!(client.rate_limit().remaining, Some(0));
}

#[tokio::test]
async fn test_rejected_token_is_not_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_json("/v1/recovery", &[], "revoked").await.unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::NotAuthenticated);
    assert!(!err.to_string().contains("revoked"));
}

#[tokio::test]
async fn test_server_error_does_not_echo_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("stack trace with secrets"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_json("/v1/cycle", &[], "tok").await.unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::UpstreamError);
    assert!(err.to_string().contains("500"));
    assert!(!err.to_string().contains("secrets"));
}

#[tokio::test]
async fn test_invalid_json_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_json("/v1/cycle", &[], "tok").await.unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::UpstreamError);
}
