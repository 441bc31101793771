#![allow(clippy::unwrap_used)]

use midea_environments::heartbeat::{notify, notify_after, send_heartbeat};
use midea_environments::sink::RunStatus;
use reqwest::Client;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_heartbeat_get() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    send_heartbeat(&Client::new(), &format!("{}/ping/abc", server.uri()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_heartbeat_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = send_heartbeat(&Client::new(), &server.uri()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_notify_is_sent_once_and_never_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    notify(&Client::new(), &server.uri()).await;
}

#[tokio::test]
async fn test_notify_tolerates_unreachable_endpoint() {
    // Port 9 (discard) on localhost is not expected to accept HTTP.
    notify(&Client::new(), "http://127.0.0.1:9/").await;
}

#[tokio::test]
async fn test_heartbeat_sent_after_delivery() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping/ok"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/ping/ok", server.uri());
    let sent = notify_after(&RunStatus::Delivered, &Client::new(), Some(&url)).await;

    assert!(sent);
}

#[tokio::test]
async fn test_heartbeat_skipped_after_failed_runs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let url = server.uri();
    for status in [
        RunStatus::SinkFailed(vec!["MQTT"]),
        RunStatus::NothingToReport,
        RunStatus::Failed,
        RunStatus::NotConfigured,
    ] {
        assert!(!notify_after(&status, &Client::new(), Some(&url)).await);
    }
}

#[tokio::test]
async fn test_heartbeat_skipped_without_url() {
    assert!(!notify_after(&RunStatus::Delivered, &Client::new(), None).await);
}
